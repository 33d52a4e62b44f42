//! Slack Events API webhook handler.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use slackrelay_protocol::ChallengeResponse;

use crate::config::ChallengeFormat;
use crate::relay::Ack;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct AckResponse {
    ok: bool,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

/// POST /slack/events
///
/// Always answers quickly: accepted events are processed after the response
/// has been produced.
pub async fn slack_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ack = match state.relay.receive(&headers, &body) {
        Ok(ack) => ack,
        Err(e) => return e.into_response(),
    };

    let (status, reason) = match ack {
        Ack::Challenge(challenge) => return challenge_response(state.challenge_format, challenge),
        Ack::Ignored(reason) => ("ignored", Some(reason.as_str())),
        Ack::Duplicate => ("duplicate", None),
        Ack::Accepted { .. } => ("accepted", None),
    };

    (
        StatusCode::OK,
        Json(AckResponse {
            ok: true,
            status,
            reason,
        }),
    )
        .into_response()
}

fn challenge_response(format: ChallengeFormat, challenge: String) -> Response {
    match format {
        ChallengeFormat::Json => (StatusCode::OK, Json(ChallengeResponse { challenge })).into_response(),
        ChallengeFormat::Plain => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            challenge,
        )
            .into_response(),
    }
}
