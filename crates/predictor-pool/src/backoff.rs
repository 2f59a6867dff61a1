use std::time::Duration;

/// Fixed-delay retry policy for walking a model fallback chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Cooldown before each retry
    pub delay: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            max_retries: 2,
        }
    }
}

impl BackoffPolicy {
    pub fn new(delay: Duration, max_retries: u32) -> Self {
        Self { delay, max_retries }
    }

    /// No waiting, no retries.
    pub fn none() -> Self {
        Self {
            delay: Duration::ZERO,
            max_retries: 0,
        }
    }

    /// Total attempts this policy permits
    pub fn max_attempts(&self) -> usize {
        self.max_retries as usize + 1
    }

    /// Whether attempt number `attempt` (0-based) may run.
    pub fn allows(&self, attempt: usize) -> bool {
        attempt < self.max_attempts()
    }

    pub async fn cooldown(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_include_first_try() {
        let policy = BackoffPolicy::new(Duration::from_millis(10), 2);
        assert_eq!(policy.max_attempts(), 3);
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }

    #[test]
    fn none_allows_exactly_one_attempt() {
        let policy = BackoffPolicy::none();
        assert!(policy.allows(0));
        assert!(!policy.allows(1));
    }
}
