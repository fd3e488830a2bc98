//! Carrier adapters and the per-carrier capability table.
//!
//! # Architecture
//!
//! - [`CarrierAdapter`] - Async trait, one implementation per carrier API
//! - [`HttpCarrierAdapter`] - Configurable JSON-over-HTTPS adapter
//! - [`CarrierProfile`] - Capability entry: rate budget, backoff, score baseline
//! - [`CarrierRegistry`] - Adapters and profiles keyed by carrier id
//! - [`detect_carrier_from_tracking`] - Carrier guess from a tracking number format
//!
//! Adding a carrier means adding a profile and an adapter to the registry;
//! the scheduler does not change.

mod detect;
mod http;
mod registry;

pub use detect::detect_carrier_from_tracking;
pub use http::{AdapterBuildError, HttpCarrierAdapter, build_carrier_http_client};
pub use registry::CarrierRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fetch::{BackoffSchedule, FetchError, RateLimit};

/// A recovered proof-of-delivery document and its extracted metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodDocument {
    /// Where the document can be retrieved (URL or storage key).
    pub document_ref: String,
    pub delivery_person: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub signature_ref: Option<String>,
}

/// Capability entry for one carrier.
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierProfile {
    /// Lowercase carrier id (`ups`, `chronopost`, ...).
    pub id: String,
    pub display_name: String,
    /// `None` admits every call.
    pub rate_limit: Option<RateLimit>,
    /// `None` uses the scheduler's default schedule.
    pub backoff: Option<BackoffSchedule>,
    /// `None` uses the scorer's default baseline.
    pub baseline_score: Option<f64>,
}

impl CarrierProfile {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into().to_ascii_lowercase();
        Self {
            display_name: id.clone(),
            id,
            rate_limit: None,
            backoff: None,
            baseline_score: None,
        }
    }

    #[must_use]
    pub fn with_rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.backoff = Some(backoff);
        self
    }

    #[must_use]
    pub fn with_baseline_score(mut self, baseline: f64) -> Self {
        self.baseline_score = Some(baseline);
        self
    }
}

/// Fetches POD documents from one carrier's API.
///
/// # Object Safety
///
/// This trait uses `async_trait` so the registry can hold
/// `Arc<dyn CarrierAdapter>` values.
#[async_trait]
pub trait CarrierAdapter: Send + Sync {
    /// Carrier id this adapter serves.
    fn carrier(&self) -> &str;

    /// Makes exactly one call for `tracking_ref`. No internal retry.
    async fn fetch_pod(&self, tracking_ref: &str) -> Result<PodDocument, FetchError>;
}
