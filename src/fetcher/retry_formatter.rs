//! Log lines for retried and abandoned metering requests.
//!
//! Every line names the series label and window of the request so a single
//! failing meter can be picked out of a busy multi-device run.

use crate::fetcher::{ApiRequest, NetworkError};
use crate::DateRange;
use std::fmt::Write as _;
use std::time::Duration;

/// Why a request attempt did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Attempt exceeded the request timeout
    Timeout,
    /// Host unreachable or connection refused
    Unreachable,
    /// Server answered 429
    Throttled,
    /// Server answered 5xx
    Upstream(u16),
    /// Token rejected (401/403)
    Credentials(u16),
    /// Device or parameter unknown to the API (404)
    UnknownSeries,
    /// Any other 4xx
    Rejected(u16),
    /// Transport failure with no better classification
    Transport,
}

impl FailureKind {
    /// Classify from the response status, falling back to the transport error
    pub fn classify(status: Option<u16>, err: Option<&NetworkError>) -> Self {
        match status.or_else(|| err.and_then(NetworkError::status)) {
            Some(429) => return Self::Throttled,
            Some(code @ (401 | 403)) => return Self::Credentials(code),
            Some(404) => return Self::UnknownSeries,
            Some(code @ 500..=599) => return Self::Upstream(code),
            Some(code @ 400..=499) => return Self::Rejected(code),
            _ => {}
        }
        match err {
            Some(NetworkError::Timeout(_)) => Self::Timeout,
            Some(NetworkError::Connect(_)) => Self::Unreachable,
            _ => Self::Transport,
        }
    }

    /// Short label used inside log lines
    pub fn label(&self) -> String {
        match self {
            Self::Timeout => "timeout".into(),
            Self::Unreachable => "API unreachable".into(),
            Self::Throttled => "throttled by API".into(),
            Self::Upstream(code) => format!("upstream error {code}"),
            Self::Credentials(code) => format!("token rejected ({code})"),
            Self::UnknownSeries => "series not found".into(),
            Self::Rejected(code) => format!("request rejected ({code})"),
            Self::Transport => "transport error".into(),
        }
    }

    /// What the operator can do about it
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Timeout => "raise --request-timeout-secs or shorten the date range",
            Self::Unreachable => "check connectivity and --base-url",
            Self::Throttled => "lower --concurrency or run outside peak hours",
            Self::Upstream(_) => "the metering API may be degraded, retry later",
            Self::Credentials(_) => "check the api_keys tokens in the config file",
            Self::UnknownSeries => "check the device id and that it records this parameter",
            Self::Rejected(_) => "check the parameter code and date range",
            Self::Transport => "check connectivity and retry",
        }
    }

    /// Whether another attempt can change the outcome
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Unreachable | Self::Throttled | Self::Upstream(_) | Self::Transport
        )
    }
}

/// Attempt bookkeeping for one request, rendered into log lines
#[derive(Debug, Clone)]
pub struct RetryNotice<'a> {
    request: &'a ApiRequest,
    attempt: u32,
    max_attempts: usize,
    kind: FailureKind,
}

impl<'a> RetryNotice<'a> {
    /// Notice for `attempt` (1-based) of `max_attempts`
    pub fn new(request: &'a ApiRequest, attempt: u32, max_attempts: usize, kind: FailureKind) -> Self {
        Self {
            request,
            attempt,
            max_attempts,
            kind,
        }
    }

    /// Classified failure
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// One-line warning logged before sleeping `delay`
    pub fn retry_line(&self, delay: Duration) -> String {
        let mut line = format!(
            "{}: {} on attempt {}/{}, retrying in {:.1}s",
            self.series(),
            self.kind.label(),
            self.attempt,
            self.max_attempts,
            delay.as_secs_f64()
        );
        if let Some(window) = &self.request.window {
            let _ = write!(line, " [{}]", window_display(window));
        }
        line
    }

    /// Multi-line report logged when the request is abandoned
    pub fn failure_report(&self, last_error: &str) -> String {
        let mut report = format!(
            "{}: giving up after {} attempt(s)\n  cause: {}\n  last error: {}\n  endpoint: {}",
            self.series(),
            self.attempt,
            self.kind.label(),
            if last_error.is_empty() { "none" } else { last_error },
            self.request.path
        );
        if let Some(window) = &self.request.window {
            let _ = write!(report, "\n  window: {}", window_display(window));
        }
        let _ = write!(report, "\n  hint: {}", self.kind.hint());
        if self.kind.is_transient() {
            let _ = write!(
                report,
                "\n  hint: raise --max-retries (currently {})",
                self.max_attempts.saturating_sub(1)
            );
        }
        report
    }

    fn series(&self) -> &str {
        if self.request.label.is_empty() {
            "unlabelled request"
        } else {
            &self.request.label
        }
    }
}

fn window_display(window: &DateRange) -> String {
    format!(
        "{} .. {}",
        window.start().format("%Y-%m-%d %H:%M"),
        window.end().format("%Y-%m-%d %H:%M")
    )
}
