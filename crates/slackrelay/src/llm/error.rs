//! LLM error types.

use std::time::Duration;

use thiserror::Error;

/// Check an HTTP response for rate-limit errors, returning `RateLimit` for 429.
pub fn check_response_error(response: &reqwest::Response) -> Option<LLMError> {
    if response.status().is_success() {
        return None;
    }
    if response.status().as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        return Some(LLMError::RateLimit { retry_after });
    }
    None
}

/// Errors that can occur when making LLM API calls.
#[derive(Debug, Error)]
pub enum LLMError {
    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// API returned an error response
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limited (429)
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimit { retry_after: Option<u64> },

    /// Response had no usable reply text
    #[error("response contained no reply text")]
    EmptyResponse,
}

/// Terminal outcome of a rate-limited completion that produced no text.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Still throttled after the retry budget was spent.
    #[error("completion service still throttling after {attempts} attempts")]
    Throttled {
        retry_after: Option<Duration>,
        attempts: u32,
    },

    #[error("completion call timed out after {0:?}")]
    Timeout(Duration),

    #[error("completion call failed: {0}")]
    Failed(#[from] LLMError),
}
