//! Reply delivery with a single fallback attempt.
//!
//! By the time a reply is delivered the webhook caller has long been
//! acknowledged, so a failed delivery has nowhere to go but the logs and the
//! relay's report channel.

mod slack;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use slackrelay_protocol::PostMessage;
use thiserror::Error;
use tracing::{error, warn};

use crate::event::Event;

pub use slack::SlackWebClient;

/// Destination platform seam.
#[async_trait]
pub trait MessagePoster: Send + Sync {
    async fn post_message(&self, message: &PostMessage) -> Result<(), DeliveryError>;
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected http status {0}")]
    Status(u16),

    #[error("slack api error: {0}")]
    Api(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    SentFallback,
    /// Neither the reply nor the fallback could be posted.
    Dropped { cause: String },
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Sent => f.write_str("sent"),
            DeliveryOutcome::SentFallback => f.write_str("sent-fallback"),
            DeliveryOutcome::Dropped { cause } => write!(f, "dropped: {cause}"),
        }
    }
}

/// Posts replies and falls back to a fixed apology when that fails.
#[derive(Clone)]
pub struct Dispatcher {
    poster: Arc<dyn MessagePoster>,
    fallback_text: String,
    thread_replies: bool,
}

impl Dispatcher {
    pub fn new(
        poster: Arc<dyn MessagePoster>,
        fallback_text: impl Into<String>,
        thread_replies: bool,
    ) -> Self {
        Self {
            poster,
            fallback_text: fallback_text.into(),
            thread_replies,
        }
    }

    /// Thread to reply under.
    ///
    /// An event already in a thread always replies there. Otherwise, with
    /// `thread_replies` enabled, the triggering message becomes the root of a
    /// new thread; with it disabled the reply goes to the channel root.
    pub fn reply_thread<'a>(&self, event: &'a Event) -> Option<&'a str> {
        match event.thread_id.as_deref() {
            Some(thread) => Some(thread),
            None if self.thread_replies && !event.message_id.is_empty() => {
                Some(event.message_id.as_str())
            }
            None => None,
        }
    }

    /// Post `text`; on failure post the fallback once.
    pub async fn deliver(
        &self,
        channel_id: &str,
        thread_id: Option<&str>,
        text: &str,
    ) -> DeliveryOutcome {
        match self.post(channel_id, thread_id, text).await {
            Ok(()) => DeliveryOutcome::Sent,
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "Reply delivery failed, sending fallback");
                self.deliver_fallback(channel_id, thread_id).await
            }
        }
    }

    /// Post only the fallback, used when no reply could be generated.
    pub async fn deliver_fallback(
        &self,
        channel_id: &str,
        thread_id: Option<&str>,
    ) -> DeliveryOutcome {
        match self.post(channel_id, thread_id, &self.fallback_text).await {
            Ok(()) => DeliveryOutcome::SentFallback,
            Err(e) => {
                error!(channel = %channel_id, error = %e, "Fallback delivery failed, dropping reply");
                DeliveryOutcome::Dropped {
                    cause: e.to_string(),
                }
            }
        }
    }

    async fn post(
        &self,
        channel_id: &str,
        thread_id: Option<&str>,
        text: &str,
    ) -> Result<(), DeliveryError> {
        let message = PostMessage {
            channel: channel_id.to_string(),
            thread_ts: thread_id.map(str::to_string),
            text: text.to_string(),
        };
        self.poster.post_message(&message).await
    }
}
