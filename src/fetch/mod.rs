//! POD fetch orchestration: admission, single calls, classification, and the
//! retry scheduler that ties them together.
//!
//! # Overview
//!
//! - [`CarrierRateLimiter`] - per-carrier fixed-window budgets
//! - [`PodFetchClient`] - one carrier call per admitted claim
//! - [`classify_error`] / [`RetryPolicy`] - taxonomy and backoff
//! - [`RetryScheduler`] - the per-cycle loop

mod client;
mod error;
pub mod rate_limiter;
pub mod retry;
mod scheduler;

pub use client::{DEFAULT_ATTEMPT_TIMEOUT, FetchResult, PodFetchClient};
pub use error::FetchError;
pub use rate_limiter::{CarrierRateLimiter, CarrierUsage, RateBudget, RateLimit};
pub use retry::{
    BackoffSchedule, Classification, DEFAULT_BACKOFF_HOURS, DEFAULT_MAX_RETRIES, ErrorClass,
    ErrorSeverity, RetryDecision, RetryPolicy, classify_error, classify_message,
};
pub use scheduler::{
    CycleReport, DEFAULT_BATCH_SIZE, DEFAULT_POD_CACHE_DAYS, MAX_BATCH_SIZE, MAX_MAX_RETRIES,
    MAX_POD_CACHE_DAYS, MIN_BATCH_SIZE, RetryScheduler, SchedulerConfig, SchedulerError,
    WatchSummary,
};
