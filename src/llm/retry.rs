//! Retry schedule for opening a completion stream
//!
//! Pure functions only; the client owns the sleeping and the event emission.

use super::LlmError;
use std::time::Duration;

/// Bounded exponential backoff.
///
/// After failed attempt `n` the wait is `multiplier * 2^(n-1)` seconds, clamped
/// to `[min_delay, max_delay]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub multiplier: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            multiplier: 1,
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep, then make attempt `next_attempt`
    Retry { next_attempt: u32, delay: Duration },
    /// No attempts left
    GiveUp,
}

impl RetryPolicy {
    /// Backoff to wait after attempt `attempt` (1-based) has failed
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let secs = u64::from(self.multiplier).saturating_mul(1u64 << exponent);
        Duration::from_secs(secs).clamp(self.min_delay, self.max_delay)
    }

    /// Decide whether attempt `attempt` failing with `error` gets another try.
    ///
    /// Every setup error is retryable: rate limits, quota and plain API errors
    /// alike. The classification only shapes the notice shown to the user.
    pub fn decide(&self, attempt: u32, _error: &LlmError) -> RetryDecision {
        if attempt < self.max_attempts {
            RetryDecision::Retry {
                next_attempt: attempt + 1,
                delay: self.delay_after(attempt),
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}
