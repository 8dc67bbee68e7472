//! Retry delays for failed pushes.
//!
//! Exponential backoff with random jitter so that replicas coming back online
//! together do not hit the server in lockstep.
//!
//! Formula: min(max, base * 2^(attempt - 1)) + random(0..=jitter)

use std::time::Duration;

use rand::Rng;

/// Default first delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default ceiling before jitter.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default upper bound on jitter.
pub const DEFAULT_JITTER: Duration = Duration::from_millis(500);

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_JITTER)
    }
}

impl Backoff {
    /// Create a schedule. `max` is raised to `base` if smaller.
    pub fn new(base: Duration, max: Duration, jitter: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter,
        }
    }

    /// Delay before retry `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }

    /// Delay before retry `attempt` (1-based), with jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay(attempt) + self.random_jitter()
    }

    fn random_jitter(&self) -> Duration {
        let bound = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=bound))
    }
}
