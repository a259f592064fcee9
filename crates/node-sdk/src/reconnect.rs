//! Reconnect policy: doubling back-off with a ceiling.

use std::time::Duration;

/// Controls how long the coordinator waits after a failed connection attempt.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// Delay before the first retry, and the value restored after a
    /// successful connect.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (cap).
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub backoff_factor: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2,
        }
    }
}

impl ReconnectBackoff {
    /// Start a fresh delay counter at the floor.
    pub fn counter(&self) -> RetryDelay {
        RetryDelay {
            policy: self.clone(),
            current: self.initial_delay,
        }
    }
}

/// Running retry delay.  Only a successful connect resets it; a mere
/// attempt never does.
#[derive(Debug, Clone)]
pub struct RetryDelay {
    policy: ReconnectBackoff,
    current: Duration,
}

impl RetryDelay {
    /// Delay to sleep now; advances the counter for the next failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.policy.max_delay);
        self.current = self
            .current
            .saturating_mul(self.policy.backoff_factor)
            .min(self.policy.max_delay);
        delay
    }

    /// Delay the next failure would sleep, without advancing.
    pub fn peek(&self) -> Duration {
        self.current.min(self.policy.max_delay)
    }

    pub fn reset(&mut self) {
        self.current = self.policy.initial_delay;
    }
}
