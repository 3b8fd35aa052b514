//! Plumbing shared by the HTTP clients: client construction, status classification
//! and a small retry loop.

use std::{future::Future, time::Duration};

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::{BotError, Result, Service};

/// A failed remote attempt and whether trying again could help.
#[derive(Debug)]
pub(crate) struct RemoteFailure {
    pub error: BotError,
    pub retryable: bool,
}

impl RemoteFailure {
    pub fn permanent(error: BotError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }

    pub fn transient(error: BotError) -> Self {
        Self {
            error,
            retryable: true,
        }
    }
}

/// Attempts and exponential backoff base.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BotError::configuration(format!("cannot build HTTP client: {e}")))
}

pub(crate) fn from_reqwest(service: Service, err: reqwest::Error) -> RemoteFailure {
    let retryable = err.is_timeout() || err.is_connect() || err.is_request();
    let error = BotError::remote(service, err.to_string());
    if retryable {
        RemoteFailure::transient(error)
    } else {
        RemoteFailure::permanent(error)
    }
}

/// Pass successful responses through; turn anything else into a classified failure.
///
/// 429 is a rate limit (not retried here), 5xx is transient, other statuses are permanent.
pub(crate) async fn check_status(
    service: Service,
    response: Response,
) -> std::result::Result<Response, RemoteFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("{status}: {}", body.trim());

    Err(if status == StatusCode::TOO_MANY_REQUESTS {
        RemoteFailure::permanent(BotError::rate_limit(service, message))
    } else if status.is_server_error() {
        RemoteFailure::transient(BotError::remote(service, message))
    } else {
        RemoteFailure::permanent(BotError::remote(service, message))
    })
}

/// Status check plus JSON decoding.
pub(crate) async fn read_json<T: DeserializeOwned>(
    service: Service,
    response: Response,
) -> std::result::Result<T, RemoteFailure> {
    let response = check_status(service, response).await?;
    response.json::<T>().await.map_err(|e| {
        RemoteFailure::permanent(BotError::remote(
            service,
            format!("unexpected response body: {e}"),
        ))
    })
}

/// Run `op` until it succeeds, fails permanently, or the attempts run out.
pub(crate) async fn with_retries<T, F, Fut>(
    service: Service,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, RemoteFailure>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(failure) if failure.retryable && attempt + 1 < policy.attempts => {
                let delay = policy.delay(attempt);
                warn!(
                    "{} attempt {} failed ({}), retrying in {:?}",
                    service,
                    attempt + 1,
                    failure.error,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(failure) => return Err(failure.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_millis(350));
        assert_eq!(policy.delay(0), Duration::from_millis(350));
        assert_eq!(policy.delay(1), Duration::from_millis(700));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts, 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(2, Duration::from_millis(1));

        let value = with_retries(Service::Embedding, policy, move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RemoteFailure::transient(BotError::remote(
                    Service::Embedding,
                    "503",
                )))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let result: Result<()> = with_retries(Service::VectorStore, policy, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(RemoteFailure::permanent(BotError::rate_limit(
                Service::VectorStore,
                "429",
            )))
        })
        .await;

        assert!(matches!(result, Err(BotError::RateLimit { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(2, Duration::from_millis(1));

        let result: Result<()> = with_retries(Service::Generation, policy, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(RemoteFailure::transient(BotError::remote(
                Service::Generation,
                "timeout",
            )))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
