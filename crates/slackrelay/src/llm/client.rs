//! Paced, retrying front of an [`LLMProvider`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::error::{CompletionError, LLMError};
use super::provider::LLMProvider;
use super::rate_limit::DispatchLimiter;
use super::types::{ChatRequest, CompletionRequest};
use crate::config::CompletionConfig;

/// Retry and timeout knobs for [`CompletionClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed wait after a throttle response.
    pub backoff: Duration,
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    /// Hard limit on each individual call.
    pub timeout: Duration,
}

impl From<&CompletionConfig> for RetryPolicy {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            backoff: config.throttle_backoff(),
            max_retries: config.max_throttle_retries,
            timeout: config.timeout(),
        }
    }
}

/// Completion client shared by every relay run in the process.
#[derive(Clone)]
pub struct CompletionClient {
    provider: Arc<dyn LLMProvider>,
    limiter: Arc<dyn DispatchLimiter>,
    model: String,
    temperature: Option<f32>,
    retry: RetryPolicy,
}

impl CompletionClient {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        limiter: Arc<dyn DispatchLimiter>,
        model: impl Into<String>,
        temperature: Option<f32>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            limiter,
            model: model.into(),
            temperature,
            retry,
        }
    }

    /// Request a reply.
    ///
    /// Every attempt, retries included, waits for a limiter slot. Throttle
    /// responses are retried after a fixed backoff until the retry budget runs
    /// out; timeouts and other failures are returned immediately.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let chat_request = ChatRequest::from_completion(&self.model, self.temperature, request);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            self.limiter.acquire().await;
            debug!(attempt = attempts, model = %self.model, "Dispatching completion call");

            let result =
                tokio::time::timeout(self.retry.timeout, self.provider.chat(chat_request.clone()))
                    .await;

            match result {
                Err(_elapsed) => return Err(CompletionError::Timeout(self.retry.timeout)),
                Ok(Ok(response)) => {
                    return response
                        .reply_text()
                        .map(str::to_string)
                        .ok_or(CompletionError::Failed(LLMError::EmptyResponse));
                }
                Ok(Err(LLMError::RateLimit { retry_after })) => {
                    let retry_after = retry_after.map(Duration::from_secs);
                    if attempts > self.retry.max_retries {
                        return Err(CompletionError::Throttled {
                            retry_after,
                            attempts,
                        });
                    }
                    warn!(
                        attempt = attempts,
                        backoff_ms = self.retry.backoff.as_millis() as u64,
                        ?retry_after,
                        "Completion service throttled, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Ok(Err(e)) => return Err(CompletionError::Failed(e)),
            }
        }
    }
}
