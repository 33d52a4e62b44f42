//! LLM provider client for chat completions.

mod client;
mod error;
mod openai;
mod provider;
mod rate_limit;
mod types;

pub use client::{CompletionClient, RetryPolicy};
pub use error::{CompletionError, LLMError};
pub use openai::OpenAICompatibleProvider;
pub use provider::LLMProvider;
pub use rate_limit::{DispatchLimiter, MAX_MIN_INTERVAL, RateLimiter};
pub use types::{
    ChatRequest, ChatResponse, Choice, CompletionRequest, Message, ResponseMessage, Role, Usage,
};
