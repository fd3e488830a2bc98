//! Repository seam for claim persistence.
//!
//! The scheduler and scorer depend on this trait rather than on
//! [`ClaimStore`] directly, so alternative stores can back them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    AcceptanceStats, CachedPod, Claim, ClaimStore, FetchAttempt, OutcomeRecord, Result,
};

/// Data-access contract for the scheduler and scorer.
#[async_trait]
pub trait ClaimRepository: Send + Sync {
    /// Claims eligible for an attempt at `now`.
    async fn select_eligible(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        batch_size: u32,
    ) -> Result<Vec<Claim>>;

    /// Persists one admitted attempt and the claim's new state.
    async fn record_outcome(&self, record: &OutcomeRecord<'_>) -> Result<()>;

    /// A recent POD for the same shipment, retrieved by any claim.
    async fn find_cached_pod(
        &self,
        carrier: &str,
        tracking_number: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<CachedPod>>;

    /// Completes a selected claim with a reused POD, without an attempt.
    async fn apply_cached_pod(&self, claim: &Claim, cached: &CachedPod) -> Result<()>;

    /// Retrieves a claim by id.
    async fn get(&self, id: i64) -> Result<Option<Claim>>;

    /// Marks damage evidence as uploaded.
    async fn attach_damage_evidence(&self, id: i64) -> Result<()>;

    /// Lists a claim's attempts, oldest first.
    async fn list_attempts(&self, claim_id: i64) -> Result<Vec<FetchAttempt>>;

    /// Historical decisions for a carrier and dispute type.
    async fn acceptance_stats(&self, carrier: &str, dispute_type: &str)
    -> Result<AcceptanceStats>;

    /// Stores a success-probability score.
    async fn update_score(&self, id: i64, score: f64) -> Result<()>;
}

#[async_trait]
impl ClaimRepository for ClaimStore {
    async fn select_eligible(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        batch_size: u32,
    ) -> Result<Vec<Claim>> {
        ClaimStore::select_eligible(self, now, max_retries, batch_size).await
    }

    async fn record_outcome(&self, record: &OutcomeRecord<'_>) -> Result<()> {
        ClaimStore::record_outcome(self, record).await
    }

    async fn find_cached_pod(
        &self,
        carrier: &str,
        tracking_number: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<CachedPod>> {
        ClaimStore::find_cached_pod(self, carrier, tracking_number, since).await
    }

    async fn apply_cached_pod(&self, claim: &Claim, cached: &CachedPod) -> Result<()> {
        ClaimStore::apply_cached_pod(self, claim, cached).await
    }

    async fn get(&self, id: i64) -> Result<Option<Claim>> {
        ClaimStore::get(self, id).await
    }

    async fn attach_damage_evidence(&self, id: i64) -> Result<()> {
        ClaimStore::attach_damage_evidence(self, id).await
    }

    async fn list_attempts(&self, claim_id: i64) -> Result<Vec<FetchAttempt>> {
        ClaimStore::list_attempts(self, claim_id).await
    }

    async fn acceptance_stats(
        &self,
        carrier: &str,
        dispute_type: &str,
    ) -> Result<AcceptanceStats> {
        ClaimStore::acceptance_stats(self, carrier, dispute_type).await
    }

    async fn update_score(&self, id: i64, score: f64) -> Result<()> {
        ClaimStore::update_score(self, id, score).await
    }
}
