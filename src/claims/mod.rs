//! Claim store: persistence for the POD fields of a claim and the attempt log.
//!
//! The engine owns only the `pod_*` columns and `ai_success_probability`;
//! the rest of the claim record is read here but written elsewhere.
//!
//! # Overview
//!
//! - [`ClaimStore`] - `SQLite`-backed operations
//! - [`ClaimRepository`] - async seam used by the scheduler and scorer
//! - [`Claim`] / [`PodFetchStatus`] - claim rows and their lifecycle
//! - [`FetchAttempt`] - immutable log of carrier calls
//!
//! # Example
//!
//! ```ignore
//! use podfetch_core::claims::{ClaimStore, NewClaim};
//! use podfetch_core::Database;
//! use std::path::Path;
//!
//! let db = Database::new(Path::new("claims.db")).await?;
//! let store = ClaimStore::new(db);
//! let id = store.create_claim(&NewClaim {
//!     claim_reference: "CLM-1".into(),
//!     carrier: "ups".into(),
//!     tracking_number: Some("1Z999AA10123456784".into()),
//!     dispute_type: "lost".into(),
//!     ..NewClaim::default()
//! }).await?;
//! store.request_pod(id).await?;
//! ```

mod attempts;
mod error;
mod item;
mod outcome;
mod repository;

use std::sync::Arc;

pub use attempts::{AttemptOutcome, FetchAttempt, NewFetchAttempt};
pub use error::{ClaimStoreError, DbErrorKind};
pub use item::{Claim, NewClaim, PodFetchStatus};
pub use outcome::{AttemptError, CachedPod, ClaimTransition, OutcomeRecord};
pub use repository::ClaimRepository;

use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, instrument, warn};

use crate::carrier::{PodDocument, detect_carrier_from_tracking};
use crate::clock::{Clock, SystemClock};
use crate::db::Database;

/// Result type for claim store operations.
pub type Result<T> = std::result::Result<T, ClaimStoreError>;

/// Returns `Ok(())` if at least one row was affected; otherwise [`ClaimStoreError::ClaimNotFound`].
fn check_affected(id: i64, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(ClaimStoreError::ClaimNotFound(id))
    } else {
        Ok(())
    }
}

/// Decided claims with the same carrier and dispute type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptanceStats {
    /// Claims with `accepted` or `rejected` status.
    pub decided: i64,
    /// Claims with `accepted` status.
    pub accepted: i64,
}

impl AcceptanceStats {
    /// Share of decided claims that were accepted, if any were decided.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rate(&self) -> Option<f64> {
        (self.decided > 0).then(|| self.accepted as f64 / self.decided as f64)
    }
}

/// `SQLite`-backed claim store.
#[derive(Debug, Clone)]
pub struct ClaimStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl ClaimStore {
    /// Creates a store that timestamps rows with the system clock.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    /// Creates a store that timestamps rows with `clock`.
    #[must_use]
    pub fn with_clock(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Inserts a claim in `not_requested`.
    ///
    /// A blank carrier is detected from the tracking number format.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::UnknownCarrier`] when no carrier is given
    /// and none can be detected, or [`ClaimStoreError::Database`] if the
    /// insert fails, including a duplicate `claim_reference`.
    #[instrument(skip(self, claim), fields(claim_ref = %claim.claim_reference, carrier = %claim.carrier))]
    pub async fn create_claim(&self, claim: &NewClaim) -> Result<i64> {
        let now = self.clock.now();
        let carrier = if claim.carrier.trim().is_empty() {
            claim
                .tracking_number
                .as_deref()
                .and_then(detect_carrier_from_tracking)
                .ok_or_else(|| ClaimStoreError::UnknownCarrier(claim.claim_reference.clone()))?
                .to_string()
        } else {
            claim.carrier.trim().to_ascii_lowercase()
        };
        let dispute_type = if claim.dispute_type.trim().is_empty() {
            "lost"
        } else {
            claim.dispute_type.as_str()
        };

        let row = sqlx::query(
            r"INSERT INTO claims (
                claim_reference, carrier, tracking_number, dispute_type,
                has_damage_evidence, incident_at, declared_at, pod_fetch_status,
                created_at, updated_at
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
              RETURNING id",
        )
        .bind(&claim.claim_reference)
        .bind(&carrier)
        .bind(claim.tracking_number.as_deref())
        .bind(dispute_type)
        .bind(claim.has_damage_evidence)
        .bind(claim.incident_at)
        .bind(claim.declared_at)
        .bind(PodFetchStatus::NotRequested.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.get("id"))
    }

    /// Requests a POD for a `not_requested` claim.
    ///
    /// The claim moves to `pending`, or to `not_available` when it has no
    /// tracking reference. Returns the new status.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::InvalidTransition`] if the claim is not in
    /// `not_requested`, or [`ClaimStoreError::ClaimNotFound`].
    #[instrument(skip(self))]
    pub async fn request_pod(&self, id: i64) -> Result<PodFetchStatus> {
        let updated: Option<(String,)> = sqlx::query_as(
            r"UPDATE claims
              SET pod_fetch_status = CASE
                      WHEN tracking_number IS NULL OR trim(tracking_number) = '' THEN ?
                      ELSE ?
                  END,
                  updated_at = ?
              WHERE id = ? AND pod_fetch_status = ?
              RETURNING pod_fetch_status",
        )
        .bind(PodFetchStatus::NotAvailable.as_str())
        .bind(PodFetchStatus::Pending.as_str())
        .bind(self.clock.now())
        .bind(id)
        .bind(PodFetchStatus::NotRequested.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        match updated {
            Some((status,)) => Ok(status.parse().unwrap_or(PodFetchStatus::Pending)),
            None => Err(self.transition_error(id, PodFetchStatus::Pending).await),
        }
    }

    /// Retrieves a claim by id.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<Option<Claim>> {
        let claim = sqlx::query_as::<_, Claim>("SELECT * FROM claims WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(claim)
    }

    /// Retrieves a claim by its reference.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::ReferenceNotFound`] if no claim matches.
    #[instrument(skip(self))]
    pub async fn get_by_reference(&self, claim_reference: &str) -> Result<Claim> {
        sqlx::query_as::<_, Claim>("SELECT * FROM claims WHERE claim_reference = ?")
            .bind(claim_reference)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| ClaimStoreError::ReferenceNotFound(claim_reference.to_string()))
    }

    /// Lists claims in a status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(status = %status))]
    pub async fn list_by_status(&self, status: PodFetchStatus) -> Result<Vec<Claim>> {
        let claims = sqlx::query_as::<_, Claim>(
            "SELECT * FROM claims WHERE pod_fetch_status = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;
        Ok(claims)
    }

    /// Counts claims in a status.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(status = %status))]
    pub async fn count_by_status(&self, status: PodFetchStatus) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM claims WHERE pod_fetch_status = ?")
                .bind(status.as_str())
                .fetch_one(self.db.pool())
                .await?;
        Ok(count)
    }

    /// Selects the claims the scheduler should attempt this cycle.
    ///
    /// `pending` claims are always eligible. `failed` claims are eligible
    /// while `retry_count < max_retries` and their backoff has elapsed.
    /// Claims never attempted come first, then the oldest last attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn select_eligible(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        batch_size: u32,
    ) -> Result<Vec<Claim>> {
        let claims = sqlx::query_as::<_, Claim>(
            r"SELECT * FROM claims
              WHERE tracking_number IS NOT NULL
                AND trim(tracking_number) != ''
                AND (
                    pod_fetch_status = ?
                    OR (
                        pod_fetch_status = ?
                        AND pod_retry_count < ?
                        AND (pod_next_eligible_at IS NULL OR pod_next_eligible_at <= ?)
                    )
                )
              ORDER BY pod_last_retry_at IS NOT NULL, pod_last_retry_at ASC, id ASC
              LIMIT ?",
        )
        .bind(PodFetchStatus::Pending.as_str())
        .bind(PodFetchStatus::Failed.as_str())
        .bind(i64::from(max_retries))
        .bind(now)
        .bind(i64::from(batch_size))
        .fetch_all(self.db.pool())
        .await?;

        debug!(selected = claims.len(), "eligible claims selected");
        Ok(claims)
    }

    /// Persists one admitted attempt: the attempt log row and the claim's new
    /// state, in one transaction.
    ///
    /// The claim update is guarded by the status and retry count read at
    /// selection time. If either changed, the attempt is still logged (the
    /// carrier call happened) but the claim is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::StaleClaim`] when the guard fails, or
    /// [`ClaimStoreError::Database`].
    #[instrument(skip(self, record), fields(claim_id = record.claim_id, target = %record.transition.target_status()))]
    pub async fn record_outcome(&self, record: &OutcomeRecord<'_>) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        let attempt = NewFetchAttempt {
            claim_id: record.claim_id,
            carrier: record.carrier,
            attempted_at: record.attempted_at,
            attempt_number: record.attempt_number(),
            outcome: record.transition.attempt_outcome(),
            error_code: record.transition.error_code(),
            error_message: record.transition.error_message(),
            unclassified: record.transition.unclassified(),
            latency_ms: record.latency_ms,
        };
        insert_attempt(&mut tx, &attempt).await?;

        let rows_affected = apply_transition(&mut tx, record).await?;
        tx.commit().await?;

        if rows_affected == 0 {
            warn!(claim_id = record.claim_id, "claim changed during attempt");
            return Err(ClaimStoreError::StaleClaim(record.claim_id));
        }
        Ok(())
    }

    /// Most recent POD retrieved for `(carrier, tracking_number)` at or after
    /// `since`, by any claim.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn find_cached_pod(
        &self,
        carrier: &str,
        tracking_number: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<CachedPod>> {
        let row: Option<CachedPodRow> = sqlx::query_as(
            r"SELECT id, pod_url, pod_delivery_person, pod_delivered_at,
                     pod_signature_ref, pod_fetched_at
              FROM claims
              WHERE carrier = ?
                AND tracking_number = ?
                AND pod_fetch_status = ?
                AND pod_url IS NOT NULL
                AND pod_fetched_at >= ?
              ORDER BY pod_fetched_at DESC
              LIMIT 1",
        )
        .bind(carrier.to_ascii_lowercase())
        .bind(tracking_number.trim())
        .bind(PodFetchStatus::Success.as_str())
        .bind(since)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(
            |(source_claim_id, document_ref, delivery_person, delivered_at, signature_ref, fetched_at)| {
                CachedPod {
                    source_claim_id,
                    document: PodDocument {
                        document_ref,
                        delivery_person,
                        delivered_at,
                        signature_ref,
                    },
                    fetched_at,
                }
            },
        ))
    }

    /// Completes a selected claim with a POD reused from another claim.
    ///
    /// No carrier call happened: the retry count and last attempt are left
    /// alone and nothing is logged. Guarded like [`Self::record_outcome`].
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::StaleClaim`] when the claim changed since
    /// selection, or [`ClaimStoreError::Database`].
    #[instrument(skip(self, claim, cached), fields(claim_id = claim.id, source_claim_id = cached.source_claim_id))]
    pub async fn apply_cached_pod(&self, claim: &Claim, cached: &CachedPod) -> Result<()> {
        let document = &cached.document;
        let result = sqlx::query(
            r"UPDATE claims
              SET pod_fetch_status = ?,
                  pod_url = ?,
                  pod_fetch_error = NULL,
                  pod_next_eligible_at = NULL,
                  pod_fetched_at = ?,
                  pod_delivery_person = ?,
                  pod_delivered_at = ?,
                  pod_signature_ref = ?,
                  updated_at = ?
              WHERE id = ? AND pod_fetch_status = ? AND pod_retry_count = ?",
        )
        .bind(PodFetchStatus::Success.as_str())
        .bind(&document.document_ref)
        .bind(cached.fetched_at)
        .bind(document.delivery_person.as_deref())
        .bind(document.delivered_at)
        .bind(document.signature_ref.as_deref())
        .bind(self.clock.now())
        .bind(claim.id)
        .bind(claim.pod_status_str.as_str())
        .bind(claim.pod_retry_count)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            warn!(claim_id = claim.id, "claim changed before cached POD was applied");
            return Err(ClaimStoreError::StaleClaim(claim.id));
        }
        Ok(())
    }

    /// Hands a claim to an operator. Any state except `success` may move to
    /// `manual`; the claim is never attempted automatically again.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::InvalidTransition`] for a `success` claim,
    /// or [`ClaimStoreError::ClaimNotFound`].
    #[instrument(skip(self, note))]
    pub async fn mark_manual(&self, id: i64, note: Option<&str>) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE claims
              SET pod_fetch_status = ?,
                  pod_fetch_error = COALESCE(?, pod_fetch_error),
                  pod_next_eligible_at = NULL,
                  updated_at = ?
              WHERE id = ? AND pod_fetch_status != ?",
        )
        .bind(PodFetchStatus::Manual.as_str())
        .bind(note)
        .bind(self.clock.now())
        .bind(id)
        .bind(PodFetchStatus::Success.as_str())
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, PodFetchStatus::Manual).await);
        }
        Ok(())
    }

    /// Re-triggers a `failed_final` claim: it goes back to `pending` for one
    /// more attempt. The retry count is kept.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::InvalidTransition`] if the claim is not
    /// `failed_final`, or [`ClaimStoreError::ClaimNotFound`].
    #[instrument(skip(self))]
    pub async fn retrigger(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE claims
              SET pod_fetch_status = ?,
                  pod_next_eligible_at = NULL,
                  pod_needs_audit = 0,
                  updated_at = ?
              WHERE id = ? AND pod_fetch_status = ?",
        )
        .bind(PodFetchStatus::Pending.as_str())
        .bind(self.clock.now())
        .bind(id)
        .bind(PodFetchStatus::FailedFinal.as_str())
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, PodFetchStatus::Pending).await);
        }
        Ok(())
    }

    /// Records that damage evidence (photos) was uploaded for a claim.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::ClaimNotFound`] or [`ClaimStoreError::Database`].
    #[instrument(skip(self))]
    pub async fn attach_damage_evidence(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE claims SET has_damage_evidence = 1, updated_at = ? WHERE id = ?",
        )
        .bind(self.clock.now())
        .bind(id)
        .execute(self.db.pool())
        .await?;
        check_affected(id, result.rows_affected())
    }

    /// Records the decision on the carrier claim (`accepted`, `rejected`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::ClaimNotFound`] or [`ClaimStoreError::Database`].
    #[instrument(skip(self))]
    pub async fn set_claim_status(&self, id: i64, claim_status: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE claims SET claim_status = ?, updated_at = ? WHERE id = ?")
                .bind(claim_status)
                .bind(self.clock.now())
                .bind(id)
                .execute(self.db.pool())
                .await?;
        check_affected(id, result.rows_affected())
    }

    /// Stores a success-probability score.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::ScoreOutOfRange`] for a value outside
    /// `[0, 1]`, or [`ClaimStoreError::ClaimNotFound`].
    #[instrument(skip(self))]
    pub async fn update_score(&self, id: i64, score: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&score) {
            return Err(ClaimStoreError::ScoreOutOfRange(score));
        }
        let result = sqlx::query(
            "UPDATE claims SET ai_success_probability = ?, updated_at = ? WHERE id = ?",
        )
        .bind(score)
        .bind(self.clock.now())
        .bind(id)
        .execute(self.db.pool())
        .await?;
        check_affected(id, result.rows_affected())
    }

    /// Appends a row to the attempt log.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::Database`] if the insert fails.
    #[instrument(skip(self, attempt), fields(claim_id = attempt.claim_id, outcome = %attempt.outcome))]
    pub async fn log_attempt(&self, attempt: &NewFetchAttempt<'_>) -> Result<i64> {
        let mut tx = self.db.pool().begin().await?;
        let id = insert_attempt(&mut tx, attempt).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Lists a claim's attempts, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_attempts(&self, claim_id: i64) -> Result<Vec<FetchAttempt>> {
        let attempts = sqlx::query_as::<_, FetchAttempt>(
            "SELECT * FROM fetch_attempts WHERE claim_id = ? ORDER BY attempted_at ASC, id ASC",
        )
        .bind(claim_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(attempts)
    }

    /// Counts calls made to a carrier at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_attempts_since(&self, carrier: &str, since: DateTime<Utc>) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM fetch_attempts WHERE carrier = ? AND attempted_at >= ?",
        )
        .bind(carrier)
        .bind(since)
        .fetch_one(self.db.pool())
        .await?;
        Ok(count)
    }

    /// Historical decisions for a carrier and dispute type.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn acceptance_stats(
        &self,
        carrier: &str,
        dispute_type: &str,
    ) -> Result<AcceptanceStats> {
        let (decided, accepted): (i64, i64) = sqlx::query_as(
            r"SELECT COUNT(*), COALESCE(SUM(claim_status = 'accepted'), 0)
              FROM claims
              WHERE carrier = ? AND dispute_type = ?
                AND claim_status IN ('accepted', 'rejected')",
        )
        .bind(carrier)
        .bind(dispute_type)
        .fetch_one(self.db.pool())
        .await?;
        Ok(AcceptanceStats { decided, accepted })
    }

    /// Counts claims per status, in lifecycle order.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimStoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn status_counts(&self) -> Result<Vec<(PodFetchStatus, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT pod_fetch_status, COUNT(*) FROM claims GROUP BY pod_fetch_status",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(PodFetchStatus::ALL
            .iter()
            .map(|status| {
                let count = rows
                    .iter()
                    .find(|(name, _)| name == status.as_str())
                    .map_or(0, |(_, count)| *count);
                (*status, count)
            })
            .collect())
    }

    /// Builds the error for a rejected transition: not found, or wrong state.
    async fn transition_error(&self, id: i64, to: PodFetchStatus) -> ClaimStoreError {
        match self.get(id).await {
            Ok(Some(claim)) => ClaimStoreError::InvalidTransition {
                id,
                from: claim.pod_status_str,
                to: to.as_str().to_string(),
            },
            Ok(None) => ClaimStoreError::ClaimNotFound(id),
            Err(err) => err,
        }
    }
}

async fn insert_attempt(
    tx: &mut Transaction<'_, Sqlite>,
    attempt: &NewFetchAttempt<'_>,
) -> Result<i64> {
    let row = sqlx::query(
        r"INSERT INTO fetch_attempts (
            claim_id, carrier, attempted_at, attempt_number, outcome,
            error_code, error_message, unclassified, latency_ms
          )
          VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
          RETURNING id",
    )
    .bind(attempt.claim_id)
    .bind(attempt.carrier)
    .bind(attempt.attempted_at)
    .bind(attempt.attempt_number)
    .bind(attempt.outcome.as_str())
    .bind(attempt.error_code)
    .bind(attempt.error_message)
    .bind(attempt.unclassified)
    .bind(attempt.latency_ms)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.get("id"))
}

type CachedPodRow = (
    i64,
    String,
    Option<String>,
    Option<DateTime<Utc>>,
    Option<String>,
    DateTime<Utc>,
);

async fn apply_transition(
    tx: &mut Transaction<'_, Sqlite>,
    record: &OutcomeRecord<'_>,
) -> Result<u64> {
    let attempt_number = record.attempt_number();
    let result = match record.transition {
        ClaimTransition::Retrieved(document) => {
            sqlx::query(
                r"UPDATE claims
                  SET pod_fetch_status = ?,
                      pod_url = ?,
                      pod_fetch_error = NULL,
                      pod_retry_count = ?,
                      pod_last_retry_at = ?,
                      pod_next_eligible_at = NULL,
                      pod_fetched_at = ?,
                      pod_delivery_person = ?,
                      pod_delivered_at = ?,
                      pod_signature_ref = ?,
                      updated_at = ?
                  WHERE id = ? AND pod_fetch_status = ? AND pod_retry_count = ?",
            )
            .bind(PodFetchStatus::Success.as_str())
            .bind(&document.document_ref)
            .bind(attempt_number)
            .bind(record.attempted_at)
            .bind(record.attempted_at)
            .bind(document.delivery_person.as_deref())
            .bind(document.delivered_at)
            .bind(document.signature_ref.as_deref())
            .bind(record.attempted_at)
            .bind(record.claim_id)
            .bind(record.selected_status.as_str())
            .bind(record.selected_retry_count)
            .execute(&mut **tx)
            .await?
        }
        ClaimTransition::RetryLater {
            error,
            next_eligible_at,
        } => {
            sqlx::query(
                r"UPDATE claims
                  SET pod_fetch_status = ?,
                      pod_fetch_error = ?,
                      pod_retry_count = ?,
                      pod_last_retry_at = ?,
                      pod_next_eligible_at = ?,
                      updated_at = ?
                  WHERE id = ? AND pod_fetch_status = ? AND pod_retry_count = ?",
            )
            .bind(PodFetchStatus::Failed.as_str())
            .bind(error.message)
            .bind(attempt_number)
            .bind(record.attempted_at)
            .bind(next_eligible_at)
            .bind(record.attempted_at)
            .bind(record.claim_id)
            .bind(record.selected_status.as_str())
            .bind(record.selected_retry_count)
            .execute(&mut **tx)
            .await?
        }
        ClaimTransition::Finalized {
            error, needs_audit, ..
        } => {
            sqlx::query(
                r"UPDATE claims
                  SET pod_fetch_status = ?,
                      pod_fetch_error = ?,
                      pod_retry_count = ?,
                      pod_last_retry_at = ?,
                      pod_next_eligible_at = NULL,
                      pod_needs_audit = ?,
                      updated_at = ?
                  WHERE id = ? AND pod_fetch_status = ? AND pod_retry_count = ?",
            )
            .bind(PodFetchStatus::FailedFinal.as_str())
            .bind(error.message)
            .bind(attempt_number)
            .bind(record.attempted_at)
            .bind(needs_audit)
            .bind(record.attempted_at)
            .bind(record.claim_id)
            .bind(record.selected_status.as_str())
            .bind(record.selected_retry_count)
            .execute(&mut **tx)
            .await?
        }
    };
    Ok(result.rows_affected())
}
