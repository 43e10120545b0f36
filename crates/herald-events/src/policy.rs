//! Retry / dead-letter policy.
//!
//! Fixed backoff, bounded attempts. A message whose every attempt fails with
//! a retryable error is redelivered `max_attempts` times; the failure after
//! that goes to the dead-letter topic whatever its kind. A not-retryable
//! failure goes there straight away.
//!
//! The policy holds no per-message state. The failure count belongs to the
//! delivery that owns the message until it is terminal, so concurrent
//! deliveries of the same message id never share a counter.

use std::time::Duration;

use crate::classify::FailureKind;

/// Default pause before a redelivery.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(5000);

/// Default number of redeliveries after the first failure.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Suffix appended to a source topic to name its dead-letter topic.
pub const DEAD_LETTER_SUFFIX: &str = "-dlt";

/// Conventional dead-letter topic for `source`.
#[must_use]
pub fn dead_letter_topic(source: &str) -> String {
    format!("{source}{DEAD_LETTER_SUFFIX}")
}

/// What to do with a message after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Redeliver after `backoff`. `attempt` counts failures so far.
    Retry { attempt: u32, backoff: Duration },
    /// Stop and publish to the dead-letter topic.
    DeadLetter { attempts: u32 },
}

/// Backoff and attempt bound for redeliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(backoff: Duration, max_attempts: u32) -> Self {
        Self {
            backoff,
            max_attempts,
        }
    }

    #[must_use]
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide given the number of failures so far, this one included.
    #[must_use]
    pub fn decide(&self, failures: u32, kind: FailureKind) -> Decision {
        match kind {
            FailureKind::Retryable if failures <= self.max_attempts => Decision::Retry {
                attempt: failures,
                backoff: self.backoff,
            },
            _ => Decision::DeadLetter { attempts: failures },
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF, DEFAULT_MAX_ATTEMPTS)
    }
}
