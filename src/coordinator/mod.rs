//! Extraction orchestration and rate limiting
//!
//! # Overview
//!
//! 1. **Dispatch**: one [`SeriesSource`](crate::fetcher::SeriesSource) call per
//!    configured device, at most `concurrency` in flight
//! 2. **Cancellation**: an optional overall deadline and the shared
//!    [`ShutdownCoordinator`](crate::shutdown::ShutdownCoordinator)
//! 3. **Merge**: results are keyed by device, never by arrival order, and the
//!    dataset is published once the run is over
//! 4. **Summary**: succeeded count, partial and failed devices with reasons,
//!    and an [`AggregateFailure`] report when too many devices failed
//!
//! # Components
//!
//! - [`executor`] - The [`ExtractionCoordinator`]
//! - [`summary`] - Run summary types
//! - [`rate_limit`] - Request-rate limiter shared by HTTP clients

pub mod executor;
pub mod rate_limit;
pub mod summary;

pub use executor::{
    CoordinatorSettings, ExtractionCoordinator, ExtractionOutcome, ProgressCallback,
    CANCELLED_REASON, DEFAULT_CONCURRENCY, DEFAULT_FAILURE_THRESHOLD, TIMEOUT_REASON,
};
pub use rate_limit::{RateLimitError, RateLimiter};
pub use summary::{AggregateFailure, DeviceOutcome, ExtractionSummary};
