//! Rate-limited HTTP client for the metering API
//!
//! Provides the request loop shared by every series fetch:
//! - Pluggable transport ([`HttpTransport`]) with a reqwest implementation
//! - Per-request timeout
//! - Retry with exponential backoff and jitter for transport errors and 5xx
//! - Separate budget for 429 responses honoring `Retry-After`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::coordinator::rate_limit::RateLimiter;
use crate::fetcher::retry::{RetryDecision, RetryPolicy};
use crate::fetcher::retry_formatter::{FailureKind, RetryNotice};
use crate::fetcher::NetworkError;
use crate::metrics::{record_retry_backoff, RequestTimer};
use crate::DateRange;

/// Header carrying the API token
pub const TOKEN_HEADER: &str = "x-dexcell-token";

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.dexcell.com/v3";

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest response excerpt kept in error messages
const MAX_ERROR_BODY_CHARS: usize = 200;

/// One authenticated GET request
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// Endpoint path relative to the base URL (e.g. "/readings")
    pub path: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// API token
    pub token: String,
    /// Label used in log lines (e.g. "1234:EACTIVE")
    pub label: String,
    /// Time window requested, for log context
    pub window: Option<DateRange>,
}

impl ApiRequest {
    /// Create a request for `path`
    pub fn new(path: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
            token: token.into(),
            label: String::new(),
            window: None,
        }
    }

    /// Append a query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attach log context
    pub fn with_context(mut self, label: impl Into<String>, window: Option<DateRange>) -> Self {
        self.label = label.into();
        self.window = window;
        self
    }

    /// Value of a query parameter
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Response as seen by the retry loop
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Parsed `Retry-After` header
    pub retry_after: Option<Duration>,
    /// Response body
    pub body: String,
}

impl HttpResponse {
    /// Response with a status and body and no `Retry-After`
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }
}

/// Issues a single HTTP attempt
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Execute `request` against the absolute `url`
    async fn execute(&self, url: &str, request: &ApiRequest) -> Result<HttpResponse, NetworkError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Build a transport with the given request timeout
    ///
    /// # Errors
    /// Returns [`NetworkError::Transport`] if the TLS backend cannot be initialised
    pub fn new(timeout: Duration) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("energy-data-extractor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NetworkError::Transport(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    fn map_error(&self, err: reqwest::Error) -> NetworkError {
        if err.is_timeout() {
            NetworkError::Timeout(self.timeout)
        } else if err.is_connect() {
            NetworkError::Connect(err.to_string())
        } else {
            NetworkError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, url: &str, request: &ApiRequest) -> Result<HttpResponse, NetworkError> {
        let response = self
            .client
            .get(url)
            .query(&request.query)
            .header(TOKEN_HEADER, &request.token)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| parse_retry_after(value, Utc::now()));
        let body = response.text().await.map_err(|e| self.map_error(e))?;

        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Parse a `Retry-After` header given as delay-seconds or an HTTP date.
///
/// Dates in the past yield a zero delay.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Client tuning knobs
#[derive(Debug, Clone)]
pub struct HttpClientSettings {
    /// API base URL
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Retry policy
    pub retry: RetryPolicy,
}

impl Default for HttpClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// HTTP client applying rate limiting, timeout and retry policy
pub struct MeteringHttpClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    policy: RetryPolicy,
    request_timeout: Duration,
    rate_limiter: Arc<RateLimiter>,
}

impl MeteringHttpClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `transport` - Transport issuing single attempts
    /// * `settings` - Base URL, timeout and retry policy
    /// * `rate_limiter` - Shared rate limiter (Arc for global quota enforcement)
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        settings: HttpClientSettings,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            transport,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            policy: settings.retry,
            request_timeout: settings.request_timeout,
            rate_limiter,
        }
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Retry policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send a request, retrying per the policy
    ///
    /// # Returns
    /// The first 2xx response
    ///
    /// # Errors
    /// Returns [`NetworkError`] once the relevant retry budget is exhausted or
    /// immediately for non-retryable statuses (4xx other than 429)
    pub async fn send(&self, request: &ApiRequest) -> Result<HttpResponse, NetworkError> {
        let url = format!("{}{}", self.base_url, request.path);
        let max_attempts = self.policy.max_retries as usize + 1;
        let mut error_retries = 0u32;
        let mut rate_limit_retries = 0u32;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.rate_limiter
                .acquire()
                .await
                .map_err(|e| NetworkError::RateLimiter(e.to_string()))?;

            let timer = RequestTimer::start(&request.path, attempt);
            let outcome =
                match tokio::time::timeout(self.request_timeout, self.transport.execute(&url, request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(NetworkError::Timeout(self.request_timeout)),
                };

            let response = match outcome {
                Ok(response) => {
                    timer.finish_status(response.status);
                    response
                }
                Err(err) => {
                    timer.finish_transport_error();
                    if error_retries < self.policy.max_retries {
                        let delay = self.policy.backoff(error_retries);
                        error_retries += 1;
                        self.log_retry(attempt, max_attempts, None, Some(&err), delay, request);
                        record_retry_backoff(delay, attempt);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    self.log_failure(attempt, max_attempts, None, Some(&err), request);
                    return Err(err);
                }
            };

            match self.policy.classify(response.status) {
                RetryDecision::Success => {
                    if attempt > 1 {
                        debug!(
                            "Request {} succeeded on attempt {}",
                            request.label, attempt
                        );
                    }
                    return Ok(response);
                }
                RetryDecision::RetryError => {
                    let err = status_error(&response);
                    if error_retries < self.policy.max_retries {
                        let delay = self.policy.backoff(error_retries);
                        error_retries += 1;
                        self.log_retry(attempt, max_attempts, Some(response.status), None, delay, request);
                        record_retry_backoff(delay, attempt);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    self.log_failure(attempt, max_attempts, Some(response.status), Some(&err), request);
                    return Err(err);
                }
                RetryDecision::RetryRateLimited => {
                    if rate_limit_retries < self.policy.max_rate_limit_retries {
                        let delay = self
                            .policy
                            .rate_limit_delay(rate_limit_retries, response.retry_after);
                        rate_limit_retries += 1;
                        let rate_limit_attempts = self.policy.max_rate_limit_retries as usize + 1;
                        self.log_retry(
                            rate_limit_retries,
                            rate_limit_attempts,
                            Some(response.status),
                            None,
                            delay,
                            request,
                        );
                        record_retry_backoff(delay, attempt);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    let err = NetworkError::RateLimited { attempts: attempt };
                    self.log_failure(attempt, max_attempts, Some(429), Some(&err), request);
                    return Err(err);
                }
                RetryDecision::Fail => {
                    debug!(
                        "Non-retryable status {} for {}",
                        response.status, request.label
                    );
                    return Err(status_error(&response));
                }
            }
        }
    }

    fn log_retry(
        &self,
        attempt: u32,
        max_attempts: usize,
        status: Option<u16>,
        err: Option<&NetworkError>,
        delay: Duration,
        request: &ApiRequest,
    ) {
        let kind = FailureKind::classify(status, err);
        warn!("{}", RetryNotice::new(request, attempt, max_attempts, kind).retry_line(delay));
    }

    fn log_failure(
        &self,
        attempt: u32,
        max_attempts: usize,
        status: Option<u16>,
        err: Option<&NetworkError>,
        request: &ApiRequest,
    ) {
        let kind = FailureKind::classify(status, err);
        let last_error = err.map(ToString::to_string).unwrap_or_default();
        warn!(
            "{}",
            RetryNotice::new(request, attempt, max_attempts, kind).failure_report(&last_error)
        );
    }
}

fn status_error(response: &HttpResponse) -> NetworkError {
    NetworkError::Status {
        status: response.status,
        message: response.body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    }
}
