//! Per-backend retry decisions with capped exponential backoff.
//!
//! Only transient failures are retried. The delay before re-issuing attempt `n + 1`
//! after attempt `n` failed is:
//!
//! ```text
//! after = min(base_delay * 2^n, max_delay)   (+/- jitter_factor / 2)
//! ```
//!
//! Retries never outlive the tier: a retry whose start would fall at or past the
//! tier deadline is dropped and the backend is counted as exhausted.

use crate::backend::errors::BackendError;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Retry policy applied to every backend of a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per backend per in-flight request, including the first one.
    pub max_attempts_per_backend: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay used as a symmetric random spread (0.0 disables jitter).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_backend: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(1000),
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    /// Backoff for the retry following failed attempt `attempt`, before jitter.
    #[must_use]
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }

    /// Largest delay jitter can produce for `attempt`.
    #[must_use]
    pub fn max_jittered_delay(&self, attempt: u32) -> Duration {
        let capped = self.capped_delay(attempt);
        capped + capped.mul_f64(self.jitter_factor.clamp(0.0, 1.0) / 2.0)
    }

    /// Sum of every backoff window one backend can go through.
    #[must_use]
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_attempts_per_backend.saturating_sub(1))
            .map(|attempt| self.max_jittered_delay(attempt))
            .sum()
    }
}

/// Why a backend will not be called again for this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The error is not retryable.
    Permanent,
    /// `max_attempts_per_backend` attempts were made.
    AttemptsExhausted,
    /// The retry would start at or past the tier deadline.
    BudgetExceeded,
}

impl GiveUpReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::AttemptsExhausted => "attempts_exhausted",
            Self::BudgetExceeded => "budget_exceeded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-issue the call after waiting `after`.
    Retry { after: Duration },
    /// Stop calling this backend.
    GiveUp(GiveUpReason),
}

/// Stateless retry policy evaluator.
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    config: RetryConfig,
}

impl RetryController {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decides whether attempt `attempt` (zero-based) that failed with `err` is retried.
    #[must_use]
    pub fn should_retry(&self, backend_id: &str, attempt: u32, err: &BackendError) -> RetryDecision {
        if !err.is_transient() {
            return RetryDecision::GiveUp(GiveUpReason::Permanent);
        }
        if attempt.saturating_add(1) >= self.config.max_attempts_per_backend {
            return RetryDecision::GiveUp(GiveUpReason::AttemptsExhausted);
        }

        let after = self.jittered_delay(attempt);
        debug!(
            backend = %backend_id,
            attempt = attempt,
            error = err.as_str(),
            delay_ms = after.as_millis(),
            "scheduling retry"
        );
        RetryDecision::Retry { after }
    }

    /// Like [`Self::should_retry`], but drops retries that would start at or past `tier_deadline`.
    #[must_use]
    pub fn should_retry_before(
        &self,
        backend_id: &str,
        attempt: u32,
        err: &BackendError,
        now: Instant,
        tier_deadline: Instant,
    ) -> RetryDecision {
        match self.should_retry(backend_id, attempt, err) {
            RetryDecision::Retry { after } if now + after >= tier_deadline => {
                RetryDecision::GiveUp(GiveUpReason::BudgetExceeded)
            }
            decision => decision,
        }
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let capped = self.config.capped_delay(attempt);
        let factor = self.config.jitter_factor.clamp(0.0, 1.0);
        if factor == 0.0 || capped.is_zero() {
            return capped;
        }

        let spread = capped.mul_f64(factor);
        let offset = rand::rng().random_range(0.0..=1.0);
        capped.saturating_sub(spread / 2) + spread.mul_f64(offset)
    }
}

/// Attempt bookkeeping for one backend within one in-flight request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    next_allowed_at: Option<Instant>,
}

impl RetryState {
    /// Registers the start of an attempt and returns its zero-based index.
    pub fn begin_attempt(&mut self) -> u32 {
        let attempt = self.attempts;
        self.attempts = self.attempts.saturating_add(1);
        self.next_allowed_at = None;
        attempt
    }

    /// Records when the next attempt may start.
    pub fn schedule(&mut self, at: Instant) {
        self.next_allowed_at = Some(at);
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn next_allowed_at(&self) -> Option<Instant> {
        self.next_allowed_at
    }
}
