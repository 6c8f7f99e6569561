//! Retry and backoff policy for metering API requests

use rand::Rng;
use std::time::Duration;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default separate budget for 429 responses.
pub const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Upper bound applied to server supplied `Retry-After` hints.
pub const MAX_RETRY_AFTER_SECS: u64 = 120;

/// How a response should be handled by the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Accept the response
    Success,
    /// Retry against the error budget
    RetryError,
    /// Retry against the rate-limit budget
    RetryRateLimited,
    /// Give up immediately
    Fail,
}

/// Explicit retry policy consumed by the HTTP client
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed for transport failures and 5xx responses
    pub max_retries: u32,
    /// Retries allowed for 429 responses, counted separately
    pub max_rate_limit_retries: u32,
    /// Base delay of the exponential schedule
    pub base_delay: Duration,
    /// Cap of the exponential schedule
    pub max_delay: Duration,
    /// Cap applied to `Retry-After` hints
    pub max_retry_after: Duration,
    /// Fraction of the delay added as random jitter (0.0 disables jitter)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            base_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            max_retry_after: Duration::from_secs(MAX_RETRY_AFTER_SECS),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given error retry budget and default timings
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Disable jitter, making delays deterministic
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Classify an HTTP status code
    pub fn classify(&self, status: u16) -> RetryDecision {
        match status {
            200..=299 => RetryDecision::Success,
            429 => RetryDecision::RetryRateLimited,
            500..=599 => RetryDecision::RetryError,
            _ => RetryDecision::Fail,
        }
    }

    /// Exponential delay for retry number `retry` (0-based), capped, without jitter
    pub fn base_backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before retry number `retry`, including jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let delay = self.base_backoff(retry);
        if self.jitter <= 0.0 {
            return delay;
        }
        let spread = delay.as_secs_f64() * self.jitter;
        let extra = rand::thread_rng().gen_range(0.0..=spread);
        delay + Duration::from_secs_f64(extra)
    }

    /// Delay before retrying a 429 response
    ///
    /// Honors the server hint when present (capped), otherwise falls back to
    /// the exponential schedule.
    pub fn rate_limit_delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) => hint.min(self.max_retry_after),
            None => self.backoff(retry),
        }
    }
}
