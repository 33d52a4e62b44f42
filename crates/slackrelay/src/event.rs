//! Normalizes Events API payloads into [`Event`]s.

use slackrelay_protocol::{Envelope, RawEvent, event_types};
use thiserror::Error;

/// Kind of an inbound event after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    UrlVerification,
    Message,
    Mention,
    Other,
}

impl EventKind {
    fn from_event_type(event_type: &str) -> Self {
        match event_type {
            event_types::MESSAGE => EventKind::Message,
            event_types::APP_MENTION => EventKind::Mention,
            _ => EventKind::Other,
        }
    }
}

/// Canonical representation of one inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub text: String,
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub message_id: String,
    pub mentions_bot: bool,
    pub subtype: Option<String>,
    /// Set when the message was authored by a bot integration.
    pub bot_id: Option<String>,
    pub user: Option<String>,
    /// Envelope-level `event_id`, stable across Slack redeliveries.
    pub event_id: Option<String>,
}

impl Event {
    /// An event the relay has no use for.
    pub fn other(event_id: Option<String>) -> Self {
        Self {
            kind: EventKind::Other,
            text: String::new(),
            channel_id: String::new(),
            thread_id: None,
            message_id: String::new(),
            mentions_bot: false,
            subtype: None,
            bot_id: None,
            user: None,
            event_id,
        }
    }
}

/// Output of the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Endpoint ownership handshake; the token must be echoed verbatim.
    Challenge(String),
    Event(Event),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("url_verification request without a challenge string")]
    MissingChallenge,
}

/// The bot's mention marker as it appears in message text, e.g. `<@U0123>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionToken(String);

impl MentionToken {
    pub fn for_user(bot_user_id: &str) -> Self {
        Self(format!("<@{bot_user_id}>"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact substring match.
    pub fn is_in(&self, text: &str) -> bool {
        !self.0.is_empty() && text.contains(&self.0)
    }

    /// Remove every occurrence of the token and trim what is left.
    pub fn strip(&self, text: &str) -> String {
        if self.0.is_empty() {
            return text.trim().to_string();
        }
        text.replace(&self.0, "").trim().to_string()
    }
}

/// Parse a raw webhook body.
///
/// A body that is not a JSON object is an error. A well-formed envelope whose
/// inner event is missing or unreadable becomes an [`EventKind::Other`] event.
pub fn normalize(body: &[u8], mention: &MentionToken) -> Result<Normalized, NormalizeError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| NormalizeError::InvalidBody(e.to_string()))?;
    if !value.is_object() {
        return Err(NormalizeError::InvalidBody("expected an object".to_string()));
    }
    let envelope: Envelope =
        serde_json::from_value(value).map_err(|e| NormalizeError::InvalidBody(e.to_string()))?;

    if envelope.is_url_verification() {
        return match envelope.challenge {
            Some(serde_json::Value::String(token)) => Ok(Normalized::Challenge(token)),
            _ => Err(NormalizeError::MissingChallenge),
        };
    }

    let Some(raw) = envelope
        .event
        .and_then(|v| serde_json::from_value::<RawEvent>(v).ok())
    else {
        return Ok(Normalized::Event(Event::other(envelope.event_id)));
    };

    let text = raw.text.unwrap_or_default();
    Ok(Normalized::Event(Event {
        kind: EventKind::from_event_type(&raw.kind),
        mentions_bot: mention.is_in(&text),
        text,
        channel_id: raw.channel.unwrap_or_default(),
        thread_id: raw.thread_ts,
        message_id: raw.ts.unwrap_or_default(),
        subtype: raw.subtype,
        bot_id: raw.bot_id,
        user: raw.user,
        event_id: envelope.event_id,
    }))
}

// ============================================================================
// Tests
// ============================================================================
