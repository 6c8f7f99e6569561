//! Unit tests for registry lookups as seen by the fetcher

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use energy_data_extractor::config::ApiKey;
use energy_data_extractor::coordinator::RateLimiter;
use energy_data_extractor::fetcher::{
    ApiRequest, HttpClientSettings, HttpResponse, HttpTransport, MeteringHttpClient, NetworkError,
    RetryPolicy, SeriesFetcher,
};
use energy_data_extractor::registry::{Operation, ParameterRegistry};
use energy_data_extractor::{DateRange, DeviceSpec, Granularity};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every request and answers with an empty series
#[derive(Default)]
struct RecordingTransport {
    requests: Mutex<Vec<ApiRequest>>,
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn execute(&self, _url: &str, request: &ApiRequest) -> Result<HttpResponse, NetworkError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(HttpResponse::new(200, r#"{"values":[]}"#))
    }
}

async fn request_for(parameter: &str, granularity: Granularity) -> ApiRequest {
    let transport = Arc::new(RecordingTransport::default());
    let settings = HttpClientSettings {
        base_url: "http://metering.test".into(),
        request_timeout: Duration::from_secs(5),
        retry: RetryPolicy::with_max_retries(0),
    };
    let client = MeteringHttpClient::new(transport.clone(), settings, Arc::new(RateLimiter::default()));
    let keys = vec![ApiKey {
        token: "secret".into(),
        client_name: "ILIM".into(),
    }];
    let fetcher = SeriesFetcher::new(client, Arc::new(ParameterRegistry::load_embedded().unwrap()), keys);

    let device = DeviceSpec {
        device_id: 99,
        name: "Boiler".into(),
        parameter: parameter.into(),
    };
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let range = DateRange::new(start, start + chrono::Duration::days(1)).unwrap();
    fetcher.fetch(&device, &range, granularity).await;

    let requests = transport.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    requests[0].clone()
}

#[tokio::test]
async fn test_consumption_parameter_requests_delta() {
    let request = request_for("EACTIVE", Granularity::Hourly).await;

    assert_eq!(request.path, "/readings");
    assert_eq!(request.token, "secret");
    assert_eq!(request.query_value("device_id"), Some("99"));
    assert_eq!(request.query_value("parameter_key"), Some("EACTIVE"));
    assert_eq!(request.query_value("operation"), Some("DELTA"));
    assert_eq!(request.query_value("resolution"), Some("H"));
    assert_eq!(request.query_value("from"), Some("2024-01-01T00:00:00Z"));
    assert_eq!(request.query_value("to"), Some("2024-01-02T00:00:00Z"));
}

#[tokio::test]
async fn test_instantaneous_parameter_requests_avg() {
    let request = request_for("POWER", Granularity::Monthly).await;

    assert_eq!(request.query_value("operation"), Some("AVG"));
    assert_eq!(request.query_value("resolution"), Some("M"));
}

#[test]
fn test_operation_query_values() {
    let registry = ParameterRegistry::load_embedded().unwrap();
    assert_eq!(registry.operation_for("EACTIVE").as_query_value(), "DELTA");
    assert_eq!(registry.operation_for("VOLTAGE"), Operation::Avg);
}
