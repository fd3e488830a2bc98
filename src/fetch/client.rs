//! POD fetch client: one carrier call per admitted claim.
//!
//! The client never retries and never classifies. It looks up the claim's
//! adapter, bounds the call with the per-attempt timeout, and reports the raw
//! outcome with its latency. Admission is the caller's job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument};

use super::FetchError;
use crate::carrier::{CarrierRegistry, PodDocument};
use crate::claims::Claim;

/// Default per-attempt timeout.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw outcome of one carrier call.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub outcome: Result<PodDocument, FetchError>,
    pub latency: Duration,
}

impl FetchResult {
    /// Latency in whole milliseconds, saturating.
    #[must_use]
    pub fn latency_ms(&self) -> i64 {
        i64::try_from(self.latency.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Dispatches fetches to the registered carrier adapters.
#[derive(Debug, Clone)]
pub struct PodFetchClient {
    registry: Arc<CarrierRegistry>,
    attempt_timeout: Duration,
}

impl PodFetchClient {
    #[must_use]
    pub fn new(registry: Arc<CarrierRegistry>, attempt_timeout: Duration) -> Self {
        Self {
            registry,
            attempt_timeout,
        }
    }

    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Makes exactly one call for `claim`.
    #[instrument(skip(self, claim), fields(claim_ref = %claim.claim_reference, carrier = %claim.carrier))]
    pub async fn fetch(&self, claim: &Claim) -> FetchResult {
        let started = Instant::now();
        let outcome = self.call(claim).await;
        let latency = started.elapsed();
        debug!(
            latency_ms = latency.as_millis(),
            ok = outcome.is_ok(),
            "carrier call finished"
        );
        FetchResult { outcome, latency }
    }

    async fn call(&self, claim: &Claim) -> Result<PodDocument, FetchError> {
        let Some(adapter) = self.registry.adapter(&claim.carrier) else {
            return Err(FetchError::unsupported(&claim.carrier));
        };
        let Some(tracking) = claim.tracking() else {
            return Err(FetchError::carrier(
                &claim.carrier,
                Some("missing_tracking".to_string()),
                "tracking number invalid: empty",
            ));
        };

        match tokio::time::timeout(self.attempt_timeout, adapter.fetch_pod(tracking)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::timeout(&claim.carrier, self.attempt_timeout)),
        }
    }
}
