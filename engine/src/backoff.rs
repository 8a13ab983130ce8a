use std::time::Duration;

/// Reconnection schedule of the push channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Number of consecutive failed attempts after which the supervisor gives up.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::defaults::DEFAULT_RECONNECT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(crate::defaults::DEFAULT_RECONNECT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(crate::defaults::DEFAULT_RECONNECT_MAX_DELAY_MS),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnection attempt number `attempt` (zero based):
    /// `min(base * 2^attempt, max)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
