use std::time::Duration;

use cabflow_core::config::WhatsAppConfig;

/// Exponential backoff for outbound channels. `max_retries` counts retries,
/// so a policy with `max_retries: 2` makes at most three attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 500, max_delay_ms: 8_000 }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self { max_retries, ..Self::default() }
    }

    pub fn immediate(max_retries: u32) -> Self {
        Self { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    pub fn for_whatsapp(config: &WhatsAppConfig) -> Self {
        Self::with_max_retries(config.max_retries)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// `attempt` is the number of attempts already made (1 after the first).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RetryPolicy;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy { max_retries: 5, base_delay_ms: 100, max_delay_ms: 350 };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn retries_are_bounded() {
        let policy = RetryPolicy::immediate(2);
        assert_eq!(policy.max_attempts(), 3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert_eq!(policy.backoff(2), Duration::ZERO);
    }
}
