//! Retry policy: a pure decision function over (error kind, attempt count).
//!
//! No clock, no randomness — the same inputs always produce the same verdict,
//! so the policy is unit-testable without waiting out real delays. The
//! dispatcher turns a `Retry` verdict into a `not_before` timestamp; nothing
//! here ever sleeps.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ErrorKind;
use crate::model::Status;

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Put the item back in the queue, invisible until `delay` has passed.
    Retry { delay: Duration },
    /// Write the terminal status and stop.
    Terminate { status: Status },
}

/// Backoff and retry-count tunables. Loadable from the `[retry]` table of the
/// tuning file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Additional attempts allowed after the first, for transient failures only.
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base_delay_secs: u64,
    /// Ceiling on the computed delay.
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_secs: 2,
            max_delay_secs: 10,
        }
    }
}

impl RetryPolicy {
    /// Decide the fate of an attempt that failed with `kind`, where
    /// `attempts` is the number of attempts made so far (including the one
    /// that just failed).
    pub fn decide(&self, kind: ErrorKind, attempts: u32) -> Verdict {
        match kind {
            ErrorKind::Validation => Verdict::Terminate {
                status: Status::FailedValidation,
            },
            ErrorKind::PortalBusiness => Verdict::Terminate {
                status: Status::FailedPortal,
            },
            // Structural portal changes need a human; auto-retrying would
            // just burn attempts against the same broken flow.
            ErrorKind::PortalChanged => Verdict::Terminate {
                status: Status::FailedTech,
            },
            ErrorKind::Unknown => Verdict::Terminate {
                status: Status::FailedTech,
            },
            ErrorKind::Transient => {
                if attempts <= self.max_retries {
                    Verdict::Retry {
                        delay: self.delay_for(attempts),
                    }
                } else {
                    Verdict::Terminate {
                        status: Status::FailedTech,
                    }
                }
            }
        }
    }

    /// Exponential backoff: base * 2^(attempts - 1), capped at the maximum.
    fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        let secs = self
            .base_delay_secs
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_secs);
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_secs: 2,
            max_delay_secs: 10,
        };
        let delays: Vec<u64> = (1..=5)
            .map(|attempt| match policy.decide(ErrorKind::Transient, attempt) {
                Verdict::Retry { delay } => delay.as_secs(),
                Verdict::Terminate { .. } => panic!("expected retry at attempt {attempt}"),
            })
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 10, 10]);
    }
}
