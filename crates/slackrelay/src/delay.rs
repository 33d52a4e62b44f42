//! Human-paced response delay.

use std::time::Duration;

use crate::config::DelayConfig;

/// Wait bounds for [`DelayPolicy::delay_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPolicy {
    pub min: Duration,
    pub max: Duration,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(30),
            max: Duration::from_secs(120),
        }
    }
}

impl From<&DelayConfig> for DelayPolicy {
    fn from(config: &DelayConfig) -> Self {
        Self {
            min: Duration::from_secs(config.min_seconds),
            max: Duration::from_secs(config.max_seconds),
        }
    }
}

impl DelayPolicy {
    /// Half a second per character, clamped to `[min, max]`.
    pub fn delay_for(&self, message_len: usize) -> Duration {
        let raw = Duration::from_millis((message_len as u64).saturating_mul(500));
        raw.clamp(self.min, self.max.max(self.min))
    }

    /// Delay for a message, measured in characters rather than bytes.
    pub fn delay_for_text(&self, text: &str) -> Duration {
        self.delay_for(text.chars().count())
    }

    pub async fn wait(&self, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
