//! Integration tests for HTTP retry behavior
//!
//! Drives `MeteringHttpClient` through a scripted transport and checks the
//! number of attempts made for each class of response.

use async_trait::async_trait;
use energy_data_extractor::coordinator::RateLimiter;
use energy_data_extractor::fetcher::{
    ApiRequest, HttpClientSettings, HttpResponse, HttpTransport, MeteringHttpClient, NetworkError,
    RetryPolicy,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replays queued responses, then repeats the fallback forever
struct ScriptedTransport {
    script: Mutex<VecDeque<u16>>,
    fallback: u16,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    fn new(script: &[u16], fallback: u16) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, _url: &str, _request: &ApiRequest) -> Result<HttpResponse, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
        let body = if status == 200 { r#"{"values":[]}"# } else { "error" };
        Ok(HttpResponse::new(status, body))
    }
}

fn client(transport: Arc<ScriptedTransport>, max_retries: u32) -> MeteringHttpClient {
    let settings = HttpClientSettings {
        base_url: "http://metering.test".into(),
        request_timeout: Duration::from_secs(5),
        retry: RetryPolicy::with_max_retries(max_retries).without_jitter(),
    };
    MeteringHttpClient::new(transport, settings, Arc::new(RateLimiter::default()))
}

fn request() -> ApiRequest {
    ApiRequest::new("/readings", "token").with_query("device_id", "1")
}

#[tokio::test(start_paused = true)]
async fn test_persistent_503_makes_max_retries_plus_one_attempts() {
    for max_retries in [0, 1, 3] {
        let transport = ScriptedTransport::new(&[], 503);
        let result = client(transport.clone(), max_retries).send(&request()).await;

        assert!(matches!(result, Err(NetworkError::Status { status: 503, .. })));
        assert_eq!(transport.calls(), max_retries as usize + 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_404_is_not_retried() {
    let transport = ScriptedTransport::new(&[], 404);
    let result = client(transport.clone(), 3).send(&request()).await;

    assert!(matches!(result, Err(NetworkError::Status { status: 404, .. })));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_transient_errors() {
    let transport = ScriptedTransport::new(&[500, 502], 200);
    let response = client(transport.clone(), 3).send(&request()).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_429_uses_separate_budget() {
    // two 429s do not consume the single error retry
    let transport = ScriptedTransport::new(&[429, 429, 503], 200);
    let response = client(transport.clone(), 1).send(&request()).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(transport.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_429_gives_up() {
    let transport = ScriptedTransport::new(&[], 429);
    let policy = RetryPolicy::default();
    let result = client(transport.clone(), 3).send(&request()).await;

    assert!(matches!(result, Err(NetworkError::RateLimited { .. })));
    assert_eq!(transport.calls(), policy.max_rate_limit_retries as usize + 1);
}
