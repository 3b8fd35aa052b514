//! # Generation client
//!
//! Sends the assembled prompt to the hosted LLM and returns the reply text. The model is
//! reached through its OpenAI-compatible chat completions endpoint, so any provider that
//! speaks that protocol works by changing `api_base` and `model`.
//!
//! Requests and responses use async-openai's chat types. The call itself goes out on the
//! shared reqwest client with no retries, so a 429 is seen once and reported as
//! [`BotError::RateLimit`] instead of being retried until the timeout. Everything else,
//! including the timeout, is [`BotError::RemoteService`].

use std::time::Duration;

use async_openai::{
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;
use tracing::debug;

use crate::{
    config::GenerationConfig,
    error::{BotError, Result, Service},
    remote,
};

#[async_trait]
pub trait Generator: Send + Sync {
    /// The model's reply, trimmed. May be empty; callers decide what to do with that.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Chat completions over the OpenAI wire protocol.
pub struct ChatCompletionGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    system_prompt: String,
    timeout: Duration,
}

fn looks_like_quota(text: &str) -> bool {
    let text = text.to_lowercase();
    ["quota", "rate limit", "rate_limit", "resource_exhausted", "429"]
        .iter()
        .any(|needle| text.contains(needle))
}

/// Providers that report exhaustion with a non-429 status still count as rate limited.
fn classify(err: BotError) -> BotError {
    match err {
        BotError::RemoteService { service, message } if looks_like_quota(&message) => {
            BotError::rate_limit(service, message)
        }
        other => other,
    }
}

fn invalid_request(err: OpenAIError) -> BotError {
    BotError::remote(Service::Generation, format!("invalid request: {err}"))
}

impl ChatCompletionGenerator {
    pub fn new(config: &GenerationConfig, timeout: Duration) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(BotError::configuration("GOOGLE_API_KEY not set"));
        }
        debug!("Generation client for {}", config.api_base);
        Ok(Self {
            client: remote::http_client(timeout)?,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            system_prompt: config.system_prompt.clone(),
            timeout,
        })
    }

    fn request(&self, prompt: &str) -> std::result::Result<CreateChatCompletionRequest, OpenAIError> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.system_prompt.clone())
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?
                .into(),
        ];

        CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .temperature(self.temperature)
            .messages(messages)
            .build()
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = self.request(prompt).map_err(invalid_request)?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| remote::from_reqwest(Service::Generation, e).error)?;
        let completion: CreateChatCompletionResponse =
            remote::read_json(Service::Generation, response)
                .await
                .map_err(|failure| failure.error)?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl Generator for ChatCompletionGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!("Generating with {} ({} prompt chars)", self.model, prompt.len());
        match tokio::time::timeout(self.timeout, self.complete(prompt)).await {
            Ok(result) => result.map_err(classify),
            Err(_) => Err(BotError::remote(
                Service::Generation,
                format!("no reply within {:?}", self.timeout),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn generator(server: &MockServer) -> ChatCompletionGenerator {
        let config = GenerationConfig {
            api_key: "g-test".into(),
            api_base: server.url("/v1beta/openai"),
            ..Default::default()
        };
        ChatCompletionGenerator::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "gemini-2.5-pro",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    #[tokio::test]
    async fn test_generate_returns_trimmed_reply() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/openai/chat/completions")
                    .header("authorization", "Bearer g-test")
                    .body_includes("gemini-2.5-pro")
                    .body_includes("You are a helpful AI.");
                then.status(200)
                    .json_body(completion("  Kuch nahi yaar, tu bata?  "));
            })
            .await;

        let reply = generator(&server).generate("User: hi\nAssistant:").await.unwrap();

        mock.assert_async().await;
        assert_eq!(reply, "Kuch nahi yaar, tu bata?");
    }

    #[tokio::test]
    async fn test_quota_error_maps_to_rate_limit() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1beta/openai/chat/completions");
                then.status(429).json_body(json!({
                    "error": {
                        "message": "You exceeded your current quota",
                        "type": "insufficient_quota",
                        "param": null,
                        "code": null
                    }
                }));
            })
            .await;

        let err = generator(&server).generate("hi").await.unwrap_err();
        assert!(matches!(
            err,
            BotError::RateLimit {
                service: Service::Generation,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_plain_rate_limit_is_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1beta/openai/chat/completions");
                then.status(429).json_body(json!({
                    "error": {
                        "message": "Too many requests, slow down",
                        "type": "requests",
                        "param": null,
                        "code": "rate_limit_exceeded"
                    }
                }));
            })
            .await;

        let started = std::time::Instant::now();
        let err = generator(&server).generate("hi").await.unwrap_err();

        assert!(matches!(
            err,
            BotError::RateLimit {
                service: Service::Generation,
                ..
            }
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
        mock.assert_calls_async(1).await;
    }

    #[tokio::test]
    async fn test_exhausted_quota_with_other_status_is_rate_limit() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1beta/openai/chat/completions");
                then.status(403)
                    .body(r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#);
            })
            .await;

        let err = generator(&server).generate("hi").await.unwrap_err();
        assert!(matches!(err, BotError::RateLimit { .. }));
    }

    #[tokio::test]
    async fn test_bad_request_maps_to_remote_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1beta/openai/chat/completions");
                then.status(400).json_body(json!({
                    "error": {
                        "message": "model not found",
                        "type": "invalid_request_error",
                        "param": null,
                        "code": null
                    }
                }));
            })
            .await;

        let err = generator(&server).generate("hi").await.unwrap_err();
        assert!(matches!(err, BotError::RemoteService { .. }));
        assert!(err.to_string().contains("model not found"));
    }

    #[test]
    fn test_quota_detection() {
        assert!(looks_like_quota("RESOURCE_EXHAUSTED"));
        assert!(looks_like_quota("Rate limit reached"));
        assert!(!looks_like_quota("invalid_request_error"));
    }
}
