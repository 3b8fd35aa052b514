//! # Conversation types
//!
//! The request-scoped pieces of a chat turn:
//!
//! - [`HistoryMessage`]: one prior message (`{"role": "user", "content": "..."}`), the JSON
//!   shape accepted by `iota ask --history`.
//! - [`ConversationTurn`]: the user message, its history and, once the pipeline has run,
//!   the assembled prompt and the generated reply. Nothing here is persisted.
//!
//! The helpers [`history_tail`] and [`history_signature`] define how much history the
//! prompt and the cache key look at.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Only the most recent messages matter for prompts and cache keys.
pub const HISTORY_TAIL_LEN: usize = 4;

/// Characters of each history message folded into the cache signature.
const SIGNATURE_CONTENT_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single prior message.
///
/// A missing `role` is read as `user`, a missing `content` as the empty string, so loosely
/// produced history files still parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

fn default_role() -> Role {
    Role::User
}

impl HistoryMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// One pass through the pipeline.
#[derive(Debug, Clone, Default)]
pub struct ConversationTurn {
    pub user_message: String,
    pub history: Vec<HistoryMessage>,
    pub assembled_prompt: Option<String>,
    pub generated_response: Option<String>,
}

impl ConversationTurn {
    /// Start a turn. The message is trimmed; history is taken as given.
    pub fn new(user_message: &str, history: Vec<HistoryMessage>) -> Self {
        Self {
            user_message: user_message.trim().to_string(),
            history,
            assembled_prompt: None,
            generated_response: None,
        }
    }
}

/// The last [`HISTORY_TAIL_LEN`] messages, oldest first.
pub fn history_tail(history: &[HistoryMessage]) -> &[HistoryMessage] {
    let start = history.len().saturating_sub(HISTORY_TAIL_LEN);
    &history[start..]
}

/// Stable JSON fingerprint of the history tail used in cache keys.
///
/// Each message contributes its role and the first 120 characters of its content, so two
/// histories that only differ in long-ago or far-down text share a signature.
pub fn history_signature(history: &[HistoryMessage]) -> String {
    let bits: Vec<(&str, String)> = history_tail(history)
        .iter()
        .map(|m| {
            (
                m.role.as_str(),
                m.content.chars().take(SIGNATURE_CONTENT_CHARS).collect(),
            )
        })
        .collect();

    // A Vec of (&str, String) always serializes.
    serde_json::to_string(&bits).unwrap_or_default()
}

/// Parse a history argument that is either inline JSON or a path to a JSON file.
///
/// An empty argument yields an empty history.
pub fn parse_history_arg(arg: &str) -> Result<Vec<HistoryMessage>> {
    let trimmed = arg.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let path = Path::new(trimmed);
    let raw = if !trimmed.starts_with('[') && path.is_file() {
        fs::read_to_string(path)?
    } else {
        trimmed.to_string()
    };

    let history: Vec<HistoryMessage> = serde_json::from_str(&raw)?;
    Ok(history)
}
