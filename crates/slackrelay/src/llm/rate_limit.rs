//! Minimum-interval pacing of outbound completion calls.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// Grants dispatch slots for completion calls.
///
/// [`RateLimiter`] only coordinates calls inside one process. Deployments
/// running several workers need an implementation backed by a shared store.
#[async_trait]
pub trait DispatchLimiter: Send + Sync {
    /// Wait for the next free slot and claim it. Returns the slot's start.
    async fn acquire(&self) -> Instant;
}

/// In-process limiter enforcing a minimum interval between call starts.
///
/// The slot is reserved under the lock and the wait happens after the lock is
/// released, so concurrent callers queue up one interval apart instead of all
/// waking at the same instant.
pub struct RateLimiter {
    min_interval: Duration,
    last_dispatch: Mutex<Option<Instant>>,
}

/// Longest interval the limiter will enforce; larger values are clamped.
pub const MAX_MIN_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval: min_interval.min(MAX_MIN_INTERVAL),
            last_dispatch: Mutex::new(None),
        }
    }

    fn reserve(&self) -> Instant {
        let mut last = self
            .last_dispatch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        let slot = match *last {
            Some(prev) => match prev.checked_add(self.min_interval) {
                Some(next) => now.max(next),
                None => now.max(prev),
            },
            None => now,
        };
        *last = Some(slot);
        slot
    }
}

#[async_trait]
impl DispatchLimiter for RateLimiter {
    async fn acquire(&self) -> Instant {
        let slot = self.reserve();
        let wait = slot.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "Pacing completion call");
            tokio::time::sleep_until(slot).await;
        }
        slot
    }
}
