//! Slack wire types for slackrelay.
//!
//! Two directions are covered:
//!
//! - [`Envelope`] / [`RawEvent`]: what Slack POSTs to the Events API webhook
//! - [`PostMessage`] / [`PostMessageResponse`]: the `chat.postMessage` call used
//!   to deliver replies
//!
//! Inbound types are deliberately lenient. Every field is optional so that a
//! payload from a newer or older API version still deserializes; deciding what
//! a missing field means is left to the relay.

use serde::{Deserialize, Serialize};

/// Top-level `type` of the endpoint ownership handshake.
pub const URL_VERIFICATION: &str = "url_verification";

/// Inner event `type` values the relay cares about.
pub mod event_types {
    pub const MESSAGE: &str = "message";
    pub const APP_MENTION: &str = "app_mention";
}

// ============================================================================
// Inbound (Events API)
// ============================================================================

/// Outer Events API envelope.
///
/// The inner `event` is kept as raw JSON so that a malformed event object
/// does not reject the whole envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Present only on `url_verification` requests.
    pub challenge: Option<serde_json::Value>,
    pub event: Option<serde_json::Value>,
    pub event_id: Option<String>,
}

impl Envelope {
    pub fn is_url_verification(&self) -> bool {
        self.kind.as_deref() == Some(URL_VERIFICATION)
    }
}

/// The inner event object of an `event_callback` envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

/// Body echoed back for a `url_verification` handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub challenge: String,
}

// ============================================================================
// Outbound (Web API)
// ============================================================================

/// `chat.postMessage` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostMessage {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    pub text: String,
}

/// `chat.postMessage` response body.
///
/// Slack reports most failures as HTTP 200 with `ok: false`.
#[derive(Debug, Clone, Deserialize)]
pub struct PostMessageResponse {
    pub ok: bool,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `auth.test` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthTestResponse {
    pub ok: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_verification_envelope() {
        let json = r#"{"token":"x","challenge":"abc123","type":"url_verification"}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert!(envelope.is_url_verification());
        assert_eq!(
            envelope.challenge,
            Some(serde_json::Value::String("abc123".to_string()))
        );
        assert!(envelope.event.is_none());
    }

    #[test]
    fn test_event_callback_envelope() {
        let json = r#"{
            "type": "event_callback",
            "team_id": "T1",
            "event_id": "Ev123",
            "event": {
                "type": "app_mention",
                "user": "U1",
                "text": "<@UBOT> hi",
                "ts": "1700000000.000100",
                "channel": "C1"
            }
        }"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert!(!envelope.is_url_verification());
        assert_eq!(envelope.event_id.as_deref(), Some("Ev123"));

        let event: RawEvent = serde_json::from_value(envelope.event.unwrap()).unwrap();
        assert_eq!(event.kind, event_types::APP_MENTION);
        assert_eq!(event.channel.as_deref(), Some("C1"));
        assert!(event.thread_ts.is_none());
        assert!(event.subtype.is_none());
    }

    #[test]
    fn test_raw_event_requires_type() {
        let value = serde_json::json!({ "text": "no type here" });
        assert!(serde_json::from_value::<RawEvent>(value).is_err());
    }

    #[test]
    fn test_post_message_omits_missing_thread() {
        let body = PostMessage {
            channel: "C1".to_string(),
            thread_ts: None,
            text: "hello".to_string(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"channel\":\"C1\""));
        assert!(!json.contains("thread_ts"));
    }

    #[test]
    fn test_post_message_response_error() {
        let json = r#"{"ok":false,"error":"channel_not_found"}"#;
        let resp: PostMessageResponse = serde_json::from_str(json).unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.error.as_deref(), Some("channel_not_found"));
    }
}
