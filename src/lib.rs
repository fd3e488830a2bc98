//! podfetch Core Library
//!
//! Proof-of-delivery (POD) acquisition for carrier delivery disputes: fetches
//! POD documents from carrier APIs under per-carrier rate budgets, classifies
//! failures, retries temporary ones on a backoff schedule, and re-scores each
//! claim's success probability once a document arrives.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - Database connection and schema management
//! - [`claims`] - Claim persistence and POD state transitions
//! - [`carrier`] - Carrier adapters, capability profiles, tracking detection
//! - [`fetch`] - Rate limiting, fetch client, error classification, scheduler
//! - [`scoring`] - Success-probability scoring
//! - [`notify`] - Terminal-state notifications
//! - [`config`] - TOML configuration
//! - [`lock`] - Single-instance guard
//! - [`clock`] - Injectable time source

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod carrier;
pub mod claims;
pub mod clock;
pub mod config;
pub mod db;
pub mod fetch;
pub mod lock;
pub mod notify;
pub mod scoring;
mod user_agent;

// Re-export commonly used types
pub use carrier::{CarrierAdapter, CarrierProfile, CarrierRegistry, PodDocument};
pub use claims::{Claim, ClaimRepository, ClaimStore, ClaimStoreError, NewClaim, PodFetchStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError};
pub use db::{Database, DbError};
pub use fetch::{
    CarrierRateLimiter, CycleReport, FetchError, PodFetchClient, RetryPolicy, RetryScheduler,
    SchedulerConfig, SchedulerError,
};
pub use lock::{InstanceLock, LockError};
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use scoring::{Scorer, ScoringService, ScoringWeights};
