//! # Vector store
//!
//! Past chat exchanges live in a hosted vector index (Pinecone). Each record is the
//! embedding of the *context* side of an exchange, with both sides carried as metadata:
//!
//! ```json
//! { "id": "<sha256>", "values": [0.01, ...], "metadata": { "context": "...", "response": "..." } }
//! ```
//!
//! [`ExchangeStore::retrieve`] runs a top-K query and turns matches back into
//! [`Exchange`]s, [`ExchangeStore::upsert`] writes new ones.
//!
//! # Example
//!
//! ```no_run
//! # async fn f() -> iota_bot::error::Result<()> {
//! use std::time::Duration;
//! use iota_bot::config::VectorStoreConfig;
//! use iota_bot::vector_store::{ExchangeStore, PineconeStore};
//!
//! let config = VectorStoreConfig {
//!     api_key: "pc-key".into(),
//!     index_host: Some("iota-chats-abc123.svc.pinecone.io".into()),
//!     ..Default::default()
//! };
//! let store = PineconeStore::new(&config, Duration::from_secs(30))?;
//! let nearest = store.retrieve(&vec![0.0; 1024], 3).await?;
//! for exchange in nearest {
//!     println!("{:.2} {} -> {}", exchange.score, exchange.context, exchange.response);
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{
    config::VectorStoreConfig,
    error::{BotError, Result, Service},
    remote,
};

/// Records per upsert request.
pub const UPSERT_BATCH: usize = 50;

const API_VERSION: &str = "2025-04";

/// A past (context, response) pair and how close it is to the current query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exchange {
    pub id: String,
    pub context: String,
    pub response: String,
    /// In `[0, 1]`.
    pub score: f32,
}

impl Exchange {
    /// A new exchange about to be stored. The id depends only on the text, so storing the
    /// same pair twice overwrites rather than duplicates.
    pub fn new(context: impl Into<String>, response: impl Into<String>) -> Self {
        let context = context.into();
        let response = response.into();
        Self {
            id: sha256::digest(format!("{context}::{response}")),
            context,
            response,
            score: 1.0,
        }
    }
}

#[async_trait]
pub trait ExchangeStore: Send + Sync {
    /// At most `top_k` exchanges, best first.
    async fn retrieve(&self, vector: &[f32], top_k: usize) -> Result<Vec<Exchange>>;

    /// Store each exchange under its vector. Returns how many records were written.
    async fn upsert(&self, records: &[(Exchange, Vec<f32>)]) -> Result<usize>;
}

#[derive(Debug, Deserialize)]
pub struct QueryMatch {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: Option<MatchMetadata>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MatchMetadata {
    pub context: Option<String>,
    pub response: Option<String>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Deserialize)]
struct IndexDescription {
    host: String,
}

/// Turn raw matches into exchanges: clamp scores into `[0, 1]`, drop matches without both
/// sides of the exchange or below `min_score`, sort best first (stable, so ties keep the
/// service's order) and keep `top_k`.
pub fn rank_matches(matches: Vec<QueryMatch>, top_k: usize, min_score: Option<f32>) -> Vec<Exchange> {
    let mut exchanges: Vec<Exchange> = matches
        .into_iter()
        .filter_map(|m| {
            let meta = m.metadata?;
            let context = meta.context.filter(|c| !c.trim().is_empty())?;
            let response = meta.response.filter(|r| !r.trim().is_empty())?;
            let score = if m.score.is_nan() {
                0.0
            } else {
                m.score.clamp(0.0, 1.0)
            };
            Some(Exchange {
                id: m.id,
                context,
                response,
                score,
            })
        })
        .filter(|e| min_score.is_none_or(|min| e.score >= min))
        .collect();

    exchanges.sort_by(|a, b| b.score.total_cmp(&a.score));
    exchanges.truncate(top_k);
    exchanges
}

fn with_scheme(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

pub struct PineconeStore {
    client: reqwest::Client,
    api_key: String,
    index_name: Option<String>,
    control_plane_url: String,
    namespace: Option<String>,
    min_score: Option<f32>,
    host: OnceCell<String>,
}

impl PineconeStore {
    pub fn new(config: &VectorStoreConfig, timeout: Duration) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(BotError::configuration("PINECONE_API_KEY not set"));
        }
        if config.index_host.is_none() && config.index_name.is_none() {
            return Err(BotError::configuration(
                "PINECONE_INDEX_NAME (or PINECONE_INDEX_HOST) not set",
            ));
        }

        let host = OnceCell::new_with(config.index_host.as_deref().map(with_scheme));

        Ok(Self {
            client: remote::http_client(timeout)?,
            api_key: config.api_key.clone(),
            index_name: config.index_name.clone(),
            control_plane_url: config.control_plane_url.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone().filter(|n| !n.is_empty()),
            min_score: config.min_score,
            host,
        })
    }

    /// The data-plane host, looked up from the index name on first use.
    async fn host(&self) -> Result<&str> {
        let host = self
            .host
            .get_or_try_init(|| async move {
                let name = self
                    .index_name
                    .as_deref()
                    .ok_or_else(|| BotError::configuration("PINECONE_INDEX_NAME not set"))?;
                let url = format!("{}/indexes/{}", self.control_plane_url, name);
                info!("Resolving Pinecone host for index {}", name);

                let response = self
                    .request(reqwest::Method::GET, &url)
                    .send()
                    .await
                    .map_err(|e| remote::from_reqwest(Service::VectorStore, e).error)?;
                let description: IndexDescription =
                    remote::read_json(Service::VectorStore, response)
                        .await
                        .map_err(|f| f.error)?;
                Ok::<_, BotError>(with_scheme(&description.host))
            })
            .await?;
        Ok(host.as_str())
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn post_json<T: serde::de::DeserializeOwned + Send>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}{}", self.host().await?, path);
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| remote::from_reqwest(Service::VectorStore, e).error)?;
        remote::read_json::<T>(Service::VectorStore, response)
            .await
            .map_err(|f| f.error)
    }
}

#[async_trait]
impl ExchangeStore for PineconeStore {
    async fn retrieve(&self, vector: &[f32], top_k: usize) -> Result<Vec<Exchange>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut body = json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
        });
        if let Some(ns) = &self.namespace {
            body["namespace"] = json!(ns);
        }

        let response: QueryResponse = self.post_json("/query", body).await?;
        debug!("Vector store returned {} matches", response.matches.len());
        Ok(rank_matches(response.matches, top_k, self.min_score))
    }

    async fn upsert(&self, records: &[(Exchange, Vec<f32>)]) -> Result<usize> {
        let mut written = 0;
        for batch in records.chunks(UPSERT_BATCH) {
            let vectors: Vec<serde_json::Value> = batch
                .iter()
                .map(|(exchange, values)| {
                    json!({
                        "id": exchange.id,
                        "values": values,
                        "metadata": {
                            "context": exchange.context,
                            "response": exchange.response,
                        },
                    })
                })
                .collect();

            let mut body = json!({ "vectors": vectors });
            if let Some(ns) = &self.namespace {
                body["namespace"] = json!(ns);
            }

            let response: UpsertResponse = self.post_json("/vectors/upsert", body).await?;
            written += response.upserted_count;
        }
        info!("Upserted {} exchanges", written);
        Ok(written)
    }
}
