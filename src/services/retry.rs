use std::time::Duration;

use rand::Rng;

/// Retry/backoff settings attached to an API client.
///
/// Attempt numbers are 1-based: attempt 1 is the first request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Longest rate-limit reset we are willing to sleep through.
    pub max_wait: Duration,
    /// Fraction of the delay randomly added or removed (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_wait: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Exponential delay after the given failed attempt, before jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        delay.mul_f64(factor).min(self.max_delay)
    }

    /// `Some(wait)` when a server-reported reset is short enough to sleep
    /// through, `None` when the caller should give up instead.
    pub fn rate_limit_wait(&self, wait: Duration) -> Option<Duration> {
        (wait <= self.max_wait).then_some(wait)
    }
}
