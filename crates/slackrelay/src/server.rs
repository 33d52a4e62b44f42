use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ChallengeFormat;
use crate::handlers;
use crate::relay::RelayEngine;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayEngine>,
    pub challenge_format: ChallengeFormat,
}

pub fn build_app(state: AppState, request_timeout_secs: u64) -> Router {
    let slack = Router::new()
        .route("/events", post(handlers::slack_events))
        .with_state(state);

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .nest("/slack", slack)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_secs),
        ))
}
