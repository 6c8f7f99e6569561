//! Metering API access: HTTP client, payload decoding and series fetching

use crate::config::DeviceSpec;
use crate::{DateRange, ExtractedSeries, Granularity};
use async_trait::async_trait;
use std::time::Duration;

pub mod http;
pub mod parser;
pub mod retry;
pub mod retry_formatter;
pub mod series;

pub use http::{
    ApiRequest, HttpClientSettings, HttpResponse, HttpTransport, MeteringHttpClient,
    ReqwestTransport,
};
pub use retry::RetryPolicy;
pub use series::SeriesFetcher;

/// Transport and HTTP status failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NetworkError {
    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// Request did not complete within the timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Any other transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Status {
        /// Status code
        status: u16,
        /// Truncated response body
        message: String,
    },

    /// Rate-limit budget exhausted
    #[error("rate limited (429) after {attempts} attempts")]
    RateLimited {
        /// Attempts made, including the first
        attempts: u32,
    },

    /// Local rate limiter failure
    #[error("rate limiter error: {0}")]
    RateLimiter(String),
}

impl NetworkError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkError::Status { status, .. } => Some(*status),
            NetworkError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Whether the error is a credential rejection (401/403)
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}

/// Payload does not match the readings shape
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// Body is not JSON or lacks the `values` array
    #[error("invalid readings payload: {0}")]
    InvalidPayload(String),

    /// Timestamp is not RFC 3339
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    /// Value is neither a number, null, nor a numeric string
    #[error("invalid reading value '{0}'")]
    InvalidValue(String),
}

/// Failure of one request window
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    /// Request failed
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Response could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Every configured credential was rejected
    #[error("all {0} api keys were rejected")]
    CredentialsRejected(usize),
}

/// Source of extracted series
///
/// Implementations must never fail past this boundary: every error is
/// reported through the returned series status.
#[async_trait]
pub trait SeriesSource: Send + Sync {
    /// Fetch one series for `device` over `range`
    async fn fetch_series(
        &self,
        device: &DeviceSpec,
        range: &DateRange,
        granularity: Granularity,
    ) -> ExtractedSeries;
}
