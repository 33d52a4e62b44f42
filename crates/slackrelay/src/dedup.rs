//! In-memory guard against Slack redeliveries.

use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tracing::debug;

/// Remembers recently accepted `event_id`s for a fixed TTL.
///
/// Slack redelivers an event when it believes the first delivery was not
/// acknowledged in time; the redelivery carries the same `event_id`.
pub struct EventDeduplicator {
    ttl: Duration,
    seen: DashMap<String, Instant>,
}

impl EventDeduplicator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: DashMap::new(),
        }
    }

    /// Record `event_id` and return `true` if it was already seen within the TTL.
    pub fn check_and_mark(&self, event_id: &str) -> bool {
        if self.ttl.is_zero() {
            return false;
        }
        let now = Instant::now();
        self.seen
            .retain(|_, seen_at| now.saturating_duration_since(*seen_at) < self.ttl);

        match self.seen.entry(event_id.to_string()) {
            Entry::Occupied(_) => {
                debug!(event_id, "Duplicate event detected");
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                false
            }
        }
    }
}
