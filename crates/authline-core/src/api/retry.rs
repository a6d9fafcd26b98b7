//! Retry policy for idempotent requests.
//!
//! A policy is a plain value: the engine asks it, after each failed attempt,
//! whether to try again and how long to wait first.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{ApiError, Reply};

/// Status codes treated as transient by the default policy
pub const DEFAULT_RETRYABLE_STATUS: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Outcome of one failed attempt, as seen by the policy
#[derive(Debug, Clone, Copy)]
pub enum AttemptOutcome<'a> {
    /// No response was obtained (connection refused, timeout, ...)
    Transport,
    /// A response arrived with a non-success status
    Response(&'a Reply),
}

impl<'a> AttemptOutcome<'a> {
    /// Map an engine error onto a retryable outcome.
    /// Errors that are neither transport nor HTTP failures are never retried.
    pub(crate) fn from_error(err: &'a ApiError) -> Option<Self> {
        match err {
            ApiError::Transport(_) => Some(AttemptOutcome::Transport),
            ApiError::Http { reply, .. } => Some(AttemptOutcome::Response(reply)),
            _ => None,
        }
    }
}

pub type RetryPredicate = Arc<dyn Fn(&AttemptOutcome<'_>) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub retry_on_transport_error: bool,
    pub retryable_status_codes: Vec<u16>,
    /// When set, decides retry-or-not on its own; the delay still comes from the policy
    pub custom_predicate: Option<RetryPredicate>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_millis(5000),
            retry_on_transport_error: true,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS.to_vec(),
            custom_predicate: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("multiplier", &self.multiplier)
            .field("max_delay", &self.max_delay)
            .field("retry_on_transport_error", &self.retry_on_transport_error)
            .field("retryable_status_codes", &self.retryable_status_codes)
            .field("custom_predicate", &self.custom_predicate.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// Policy for non-idempotent requests: one attempt, never retried
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_retry_on_transport_error(mut self, enabled: bool) -> Self {
        self.retry_on_transport_error = enabled;
        self
    }

    pub fn with_retryable_status_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
        self.retryable_status_codes = codes.into();
        self
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&AttemptOutcome<'_>) -> bool + Send + Sync + 'static,
    {
        self.custom_predicate = Some(Arc::new(predicate));
        self
    }

    /// Backoff after the given (1-indexed) failed attempt:
    /// `base * multiplier^(n-1)`, clamped to `[0, max_delay]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw_ms = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;

        if raw_ms.is_nan() {
            return Duration::ZERO;
        }
        // Infinite growth clamps to the cap as well
        Duration::from_millis(raw_ms.clamp(0.0, max_ms).floor() as u64)
    }

    /// Whether another attempt should follow `attempt`, and after what delay
    pub fn decide(&self, attempt: u32, outcome: &AttemptOutcome<'_>) -> RetryDecision {
        let retry = if attempt >= self.max_attempts {
            false
        } else if let Some(ref predicate) = self.custom_predicate {
            predicate(outcome)
        } else {
            match outcome {
                AttemptOutcome::Transport => self.retry_on_transport_error,
                AttemptOutcome::Response(reply) => self
                    .retryable_status_codes
                    .contains(&reply.status().as_u16()),
            }
        };

        RetryDecision {
            retry,
            delay: self.delay_for(attempt),
        }
    }
}
