//! slackrelay - relays Slack events to a completion service and posts the
//! reply back, acknowledging the webhook before any slow work starts.

pub mod config;
pub mod dedup;
pub mod delay;
pub mod delivery;
pub mod event;
pub mod filter;
pub mod handlers;
pub mod llm;
pub mod relay;
pub mod response;
pub mod server;
pub mod verify;
