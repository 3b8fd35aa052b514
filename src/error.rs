//! # Error taxonomy
//!
//! Every fallible operation in the crate returns [`BotError`]. The variants map
//! one-to-one onto how the failure is handled:
//!
//! | Variant            | Raised by                               | Handling                         |
//! |--------------------|-----------------------------------------|----------------------------------|
//! | `Configuration`    | [`crate::config`], [`crate::persona`]   | fatal at startup                 |
//! | `RemoteService`    | embedding / vector store / generation   | aborts the current turn          |
//! | `RateLimit`        | any hosted API answering 429 or "quota" | aborts the current turn          |
//! | `CacheStorage`     | [`crate::cache`]                        | logged, turn continues uncached  |
//!
//! The remaining variants wrap plumbing errors from the CLI (files, JSON, YAML).

use std::fmt;

use thiserror::Error;

/// The three hosted collaborators a turn depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Embedding,
    VectorStore,
    Generation,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Service::Embedding => "embedding API",
            Service::VectorStore => "vector store",
            Service::Generation => "generation API",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{service} error: {message}")]
    RemoteService { service: Service, message: String },

    #[error("{service} rate limit exceeded: {message}")]
    RateLimit { service: Service, message: String },

    #[error("Cache storage error: {0}")]
    CacheStorage(String),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl BotError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn remote(service: Service, message: impl Into<String>) -> Self {
        Self::RemoteService {
            service,
            message: message.into(),
        }
    }

    pub fn rate_limit(service: Service, message: impl Into<String>) -> Self {
        Self::RateLimit {
            service,
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::CacheStorage(message.into())
    }

    /// True for failures of a hosted API (including rate limiting).
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteService { .. } | Self::RateLimit { .. })
    }
}

impl From<diesel::result::Error> for BotError {
    fn from(err: diesel::result::Error) -> Self {
        Self::CacheStorage(err.to_string())
    }
}

impl From<diesel::ConnectionError> for BotError {
    fn from(err: diesel::ConnectionError) -> Self {
        Self::CacheStorage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
