//! Bounded retry with jittered exponential backoff.
//!
//! The retry budget is an explicit, testable parameter: a [`RetryConfig`]
//! yields a finite [`Backoff`] schedule, and whoever drives the loop turns
//! exhaustion into a typed error instead of looping forever. The projection
//! applier uses this for its fetch-check-write cycle; command-handler callers
//! can use it to retry concurrency conflicts.

use std::time::Duration;

/// Configuration for bounded retry behaviour.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub base_delay: Duration,
    /// Cap on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied per attempt for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries; the first failure is final.
    pub const fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// The delay before the retry following attempt number `attempt`
    /// (zero-based). Exponential with ±25% jitter to avoid thundering herds.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay = base_ms * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let delay = delay.min(max_ms);

        let mut rng = rand::rng();
        let jitter = delay * 0.25 * (rng.random::<f64>() - 0.5) * 2.0;
        let final_delay = (delay + jitter).clamp(0.0, max_ms) as u64;

        Duration::from_millis(final_delay)
    }

    /// The finite schedule of `(attempt, delay-before-next-attempt)` pairs.
    ///
    /// Yields one entry per attempt; the delay of the final entry is `None`,
    /// marking the budget as spent.
    pub fn schedule(&self) -> Backoff<'_> {
        Backoff {
            config: self,
            next_attempt: 0,
        }
    }
}

/// Iterator over a bounded retry schedule. See [`RetryConfig::schedule`].
#[derive(Debug)]
pub struct Backoff<'a> {
    config: &'a RetryConfig,
    next_attempt: u32,
}

impl Iterator for Backoff<'_> {
    /// `(attempt number, delay before the next attempt or None if last)`.
    type Item = (u32, Option<Duration>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_attempt >= self.config.max_attempts {
            return None;
        }
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        let delay = (self.next_attempt < self.config.max_attempts)
            .then(|| self.config.delay_for_attempt(attempt));
        Some((attempt, delay))
    }
}
