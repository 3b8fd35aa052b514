//! # Embedding client
//!
//! Turns text into the fixed-length vectors the vector index is built on. The model runs
//! behind the Hugging Face inference API (`feature-extraction` pipeline); this module only
//! formats the request, checks the shape of what comes back and retries transient failures.
//!
//! E5-family models expect a role prefix, so callers say what the text is with
//! [`EmbedKind`]: the live user message is a [`EmbedKind::Query`], stored context is a
//! [`EmbedKind::Passage`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{
    config::EmbeddingConfig,
    error::{BotError, Result, Service},
    remote::{self, RemoteFailure, RetryPolicy},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedKind {
    Query,
    Passage,
}

impl EmbedKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            EmbedKind::Query => "query: ",
            EmbedKind::Passage => "passage: ",
        }
    }
}

/// Anything that can embed text.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, kind: EmbedKind) -> Result<Vec<f32>>;

    /// Length of every vector [`Embedder::embed`] returns.
    fn dimension(&self) -> usize;
}

/// The inference API answers with either one vector or one vector per token/row.
#[derive(Deserialize)]
#[serde(untagged)]
enum FeatureExtraction {
    Flat(Vec<f32>),
    Nested(Vec<Vec<f32>>),
}

impl FeatureExtraction {
    fn into_vector(self) -> Option<Vec<f32>> {
        match self {
            FeatureExtraction::Flat(v) => Some(v),
            FeatureExtraction::Nested(mut rows) => match rows.len() {
                0 => None,
                1 => rows.pop(),
                _ => mean_pool(&rows),
            },
        }
    }
}

fn mean_pool(rows: &[Vec<f32>]) -> Option<Vec<f32>> {
    let width = rows.first()?.len();
    if rows.iter().any(|r| r.len() != width) {
        return None;
    }
    let mut pooled = vec![0.0f32; width];
    for row in rows {
        for (acc, x) in pooled.iter_mut().zip(row) {
            *acc += x;
        }
    }
    let n = rows.len() as f32;
    pooled.iter_mut().for_each(|x| *x /= n);
    Some(pooled)
}

pub struct HuggingFaceEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    dimension: usize,
    retry: RetryPolicy,
}

impl HuggingFaceEmbedder {
    pub fn new(config: &EmbeddingConfig, timeout: Duration) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(BotError::configuration("HF_API_KEY not set"));
        }
        let endpoint = format!(
            "{}/{}/pipeline/feature-extraction",
            config.api_base.trim_end_matches('/'),
            config.model
        );
        debug!("Embedding endpoint: {}", endpoint);

        Ok(Self {
            client: remote::http_client(timeout)?,
            endpoint,
            api_key: config.api_key.clone(),
            dimension: config.dimension,
            retry: RetryPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
        })
    }

    async fn request(&self, input: &str) -> std::result::Result<Vec<f32>, RemoteFailure> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({ "inputs": input }))
            .send()
            .await
            .map_err(|e| remote::from_reqwest(Service::Embedding, e))?;

        let body: FeatureExtraction = remote::read_json(Service::Embedding, response).await?;
        let vector = body.into_vector().ok_or_else(|| {
            RemoteFailure::permanent(BotError::remote(
                Service::Embedding,
                "empty or ragged embedding in response",
            ))
        })?;

        if vector.len() != self.dimension {
            return Err(RemoteFailure::permanent(BotError::remote(
                Service::Embedding,
                format!(
                    "embedding has {} dimensions, index expects {}",
                    vector.len(),
                    self.dimension
                ),
            )));
        }
        Ok(vector)
    }
}

#[async_trait]
impl Embedder for HuggingFaceEmbedder {
    async fn embed(&self, text: &str, kind: EmbedKind) -> Result<Vec<f32>> {
        let input = format!("{}{}", kind.prefix(), text.trim());
        debug!("Embedding {} chars as {:?}", input.len(), kind);
        let input = input.as_str();
        remote::with_retries(Service::Embedding, self.retry, move || self.request(input)).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
