//! Request-rate limiting shared by all workers
//!
//! Each request holds one permit until its window elapses, so at most
//! `requests_per_window` requests start within any window regardless of
//! how many devices are being fetched concurrently.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

/// Default request budget per window
pub const DEFAULT_REQUESTS_PER_WINDOW: usize = 600;

/// Default rate limit window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Sliding request quota for the metering API
#[derive(Clone, Debug)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    requests_per_window: usize,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_WINDOW, DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    /// Allow `requests_per_window` request starts per `window`
    ///
    /// A zero budget is raised to one so acquisition can always progress.
    pub fn new(requests_per_window: usize, window: Duration) -> Self {
        let requests_per_window = requests_per_window.max(1);
        Self {
            permits: Arc::new(Semaphore::new(requests_per_window)),
            requests_per_window,
            window,
        }
    }

    /// Requests allowed per window
    pub fn requests_per_window(&self) -> usize {
        self.requests_per_window
    }

    /// Window length
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Request starts still available in the current window
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a slot in the window, then claim it
    ///
    /// The slot is released `window` after it was claimed.
    pub async fn acquire(&self) -> Result<(), RateLimitError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RateLimitError::Closed)?;

        let window = self.window;
        tokio::spawn(async move {
            sleep(window).await;
            drop(permit);
        });

        Ok(())
    }
}

/// Rate limiter errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The limiter's semaphore was closed while waiting
    #[error("rate limiter closed")]
    Closed,
}
