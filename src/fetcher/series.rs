//! Per-series fetching with window splitting and credential fallback

use async_trait::async_trait;
use chrono::SecondsFormat;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{ApiKey, DeviceSpec, ExtractionConfig};
use crate::coordinator::rate_limit::RateLimiter;
use crate::fetcher::http::{ApiRequest, HttpClientSettings, HttpTransport, MeteringHttpClient, ReqwestTransport};
use crate::fetcher::parser::parse_readings;
use crate::fetcher::{FetchError, NetworkError, SeriesSource};
use crate::registry::ParameterRegistry;
use crate::{DateRange, ExtractedSeries, FetchStatus, Granularity, RawSeriesPoint, SeriesKey};

/// Readings endpoint path
pub const READINGS_PATH: &str = "/readings";

/// Fetches one device series at a time through the shared HTTP client
pub struct SeriesFetcher {
    client: MeteringHttpClient,
    registry: Arc<ParameterRegistry>,
    api_keys: Vec<ApiKey>,
}

impl SeriesFetcher {
    /// Create a fetcher from its parts
    pub fn new(client: MeteringHttpClient, registry: Arc<ParameterRegistry>, api_keys: Vec<ApiKey>) -> Self {
        Self {
            client,
            registry,
            api_keys,
        }
    }

    /// Fetcher over reqwest with default settings
    ///
    /// # Errors
    /// Returns [`NetworkError`] if the HTTP client cannot be built
    pub fn with_defaults(
        config: &ExtractionConfig,
        registry: Arc<ParameterRegistry>,
    ) -> Result<Self, NetworkError> {
        Self::from_settings(config, registry, HttpClientSettings::default(), Arc::new(RateLimiter::default()))
    }

    /// Fetcher over reqwest with explicit settings
    ///
    /// # Errors
    /// Returns [`NetworkError`] if the HTTP client cannot be built
    pub fn from_settings(
        config: &ExtractionConfig,
        registry: Arc<ParameterRegistry>,
        settings: HttpClientSettings,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, NetworkError> {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(settings.request_timeout)?);
        let client = MeteringHttpClient::new(transport, settings, rate_limiter);
        Ok(Self::new(client, registry, config.api_keys().to_vec()))
    }

    /// Fetch one series
    ///
    /// Never fails: errors are reported in the returned status. Windows that
    /// fail are dropped and the series becomes `Partial`; if every window
    /// fails the series is `Failed` with the first reason and no points.
    pub async fn fetch(
        &self,
        device: &DeviceSpec,
        range: &DateRange,
        granularity: Granularity,
    ) -> ExtractedSeries {
        let key = SeriesKey::new(device.device_id, device.parameter.clone());
        if self.api_keys.is_empty() {
            return ExtractedSeries::failed(device, "no api keys configured");
        }

        let windows = range.windows(granularity.max_window());
        let key_index = AtomicUsize::new(0);
        let mut points: Vec<RawSeriesPoint> = Vec::new();
        let mut failures: Vec<String> = Vec::new();

        for window in &windows {
            match self.fetch_window(device, &key, window, granularity, &key_index).await {
                Ok(mut page) => {
                    debug!("Fetched {} points for {} in {}", page.len(), key, window);
                    points.append(&mut page);
                }
                Err(err) => {
                    warn!("Window {} failed for {}: {}", window, key, err);
                    failures.push(err.to_string());
                }
            }
        }

        if failures.len() == windows.len() {
            let reason = failures
                .into_iter()
                .next()
                .unwrap_or_else(|| "no request windows".to_string());
            return ExtractedSeries::failed(device, reason);
        }

        let status = match failures.first() {
            None => FetchStatus::Ok,
            Some(first) => FetchStatus::Partial(format!(
                "{} of {} windows failed: {}",
                failures.len(),
                windows.len(),
                first
            )),
        };

        let client_name = self
            .api_keys
            .get(key_index.load(Ordering::Relaxed))
            .map(|k| k.client_name.clone());

        ExtractedSeries {
            device_id: device.device_id,
            name: device.name.clone(),
            parameter: device.parameter.clone(),
            client_name,
            points: normalize_points(points),
            status,
        }
    }

    async fn fetch_window(
        &self,
        device: &DeviceSpec,
        key: &SeriesKey,
        window: &DateRange,
        granularity: Granularity,
        key_index: &AtomicUsize,
    ) -> Result<Vec<RawSeriesPoint>, FetchError> {
        let operation = self.registry.operation_for(&device.parameter);
        let start_index = key_index.load(Ordering::Relaxed);

        for index in start_index..self.api_keys.len() {
            let api_key = &self.api_keys[index];
            let request = ApiRequest::new(READINGS_PATH, api_key.token.clone())
                .with_query("device_id", device.device_id.to_string())
                .with_query("operation", operation.as_query_value())
                .with_query("parameter_key", device.parameter.clone())
                .with_query("resolution", granularity.resolution_code())
                .with_query("from", window.start().to_rfc3339_opts(SecondsFormat::Secs, true))
                .with_query("to", window.end().to_rfc3339_opts(SecondsFormat::Secs, true))
                .with_context(key.to_string(), Some(*window));

            match self.client.send(&request).await {
                Ok(response) => {
                    key_index.store(index, Ordering::Relaxed);
                    return Ok(parse_readings(&response.body)?);
                }
                Err(err) if err.is_auth_failure() => {
                    warn!(
                        "Credential for client '{}' rejected for {}: {}",
                        api_key.client_name, key, err
                    );
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(FetchError::CredentialsRejected(self.api_keys.len() - start_index))
    }
}

#[async_trait]
impl SeriesSource for SeriesFetcher {
    async fn fetch_series(
        &self,
        device: &DeviceSpec,
        range: &DateRange,
        granularity: Granularity,
    ) -> ExtractedSeries {
        self.fetch(device, range, granularity).await
    }
}

/// Order points chronologically and drop repeated timestamps, keeping the
/// first occurrence.
pub fn normalize_points(mut points: Vec<RawSeriesPoint>) -> Vec<RawSeriesPoint> {
    points.sort_by_key(|p| p.timestamp);
    points.dedup_by_key(|p| p.timestamp);
    points
}
