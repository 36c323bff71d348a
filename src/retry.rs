use std::time::Duration;
use tracing::warn;

/// Decision returned by the retry policy after a startup attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Budget remains, start again (includes 1-based number of the next attempt).
    Retry { attempt: u32 },
    /// Every allowed attempt has failed.
    GiveUp { attempts: u32 },
}

/// Startup timing and retry budget for a producer.
///
/// `max_attempts` counts every spawn, the first one included: a policy of 3
/// spawns at most three times before giving up.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    settle_delay: Duration,
    retry_delay: Duration,
    max_attempts: u32,
    current_attempt: u32,
}

impl RetryPolicy {
    pub fn new(settle_delay: Duration, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            settle_delay,
            retry_delay,
            max_attempts,
            current_attempt: 1,
        }
    }

    /// How long a fresh producer gets before its liveness is trusted.
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Pause between a failed attempt and the next spawn.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether the attempt about to run is still within budget.
    pub fn has_budget(&self) -> bool {
        self.current_attempt <= self.max_attempts
    }

    /// Record a failed attempt and decide what happens next.
    pub fn record_failure(&mut self) -> RetryDecision {
        self.current_attempt += 1;

        if self.current_attempt <= self.max_attempts {
            warn!(
                attempt = self.current_attempt,
                max_attempts = self.max_attempts,
                "producer startup failed, retrying"
            );
            RetryDecision::Retry {
                attempt: self.current_attempt,
            }
        } else {
            RetryDecision::GiveUp {
                attempts: self.current_attempt - 1,
            }
        }
    }

    /// Reset the counter for a new supervision attempt.
    pub fn reset(&mut self) {
        self.current_attempt = 1;
    }

    /// 1-based number of the attempt in flight.
    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}
