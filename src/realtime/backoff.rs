use std::time::Duration;

use serde::Deserialize;

/// Bounded exponential backoff for realtime channel reconnects.
///
/// The delay before retry `attempt` (zero-based) is
/// `min(base_delay_ms * 2^attempt, max_delay_ms)`. After `max_retries`
/// failed retries the subscription is reported as degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    #[must_use]
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_retries
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            max_retries: 3,
        }
    }
}
