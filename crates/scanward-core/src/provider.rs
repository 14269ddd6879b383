//! Generative completion seam.
//!
//! Clients are constructed by the caller and injected into planners, stages
//! and enrichers; nothing in the core reaches for a global client.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::error::ProviderError;
use crate::metrics::METRICS;
use crate::retry::{retry_async, RetryDecision, RetryOutcome, RetryPolicy};

/// Text-in, text-out generative model call.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Call `client` with a per-call timeout, retrying rate-limit failures only.
///
/// Back-off honours a retry hint embedded in the error text, capped by the
/// policy; other failures return after the first attempt.
pub async fn complete_with_retry(
    client: &dyn CompletionClient,
    prompt: &str,
    policy: &RetryPolicy,
    timeout: Duration,
) -> RetryOutcome<String, ProviderError> {
    retry_async(
        policy,
        "completion",
        |_| async move {
            match tokio::time::timeout(timeout, client.complete(prompt)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        },
        |err: &ProviderError| match err {
            ProviderError::RateLimited { message } => {
                METRICS.inc_rate_limited();
                RetryDecision::Retry {
                    delay: policy.delay_from_message(message),
                }
            }
            _ => RetryDecision::GiveUp,
        },
    )
    .await
}
