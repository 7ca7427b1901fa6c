use super::error::RequestError;
use rand::Rng;
use std::time::Duration;

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Whether to retry a failed call, and after how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retryable: bool,
    pub delay: Duration,
}

/// Exponential backoff with jitter, shared by the request layer and the
/// push channel's reconnect loop.
///
/// The delay for attempt `n` is `min(base * 2^n + jitter, max_delay)` where
/// `jitter` is uniform in `[0, max_jitter)`. A 429 carrying `Retry-After`
/// overrides the computed delay entirely, cap included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
    /// Total attempts (first try included) the request layer makes.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying `err` on the given zero-based attempt.
    pub fn retry_delay(&self, err: &RequestError, attempt: u32) -> Duration {
        if let Some(retry_after) = err.retry_after() {
            return retry_after;
        }
        self.backoff_delay(attempt)
    }

    /// Backoff delay for `attempt`, ignoring any server-supplied delay.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
        };
        self.delay_with_jitter(attempt, jitter)
    }

    /// Deterministic core of [`backoff_delay`](Self::backoff_delay).
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        // 2^attempt overflows u32 past 31; anything that large is capped anyway
        let exponential = match 1u32.checked_shl(attempt) {
            Some(factor) => self.base_delay.saturating_mul(factor),
            None => self.max_delay,
        };
        exponential.saturating_add(jitter).min(self.max_delay)
    }

    pub fn decide(&self, err: &RequestError, attempt: u32) -> RetryDecision {
        RetryDecision {
            retryable: err.is_retryable(),
            delay: self.retry_delay(err, attempt),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
