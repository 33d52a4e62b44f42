//! HTTP request handlers.

mod events;
mod health;
mod version;

pub use events::slack_events;
pub use health::{livez, readyz};
pub use version::version;
