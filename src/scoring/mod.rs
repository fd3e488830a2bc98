//! Deterministic success-probability scoring for claims.
//!
//! The score is a weighted sum, clamped to `[0, 1]`:
//!
//! ```text
//! baseline(carrier)
//!   + pod_retrieved        if a signed POD document was recovered
//!   + pod_unsigned         instead, if the recovered POD carries no signature
//!   + damage_evidence      if damage photos exist
//!   + high_acceptance      if the carrier accepts this dispute type often enough
//!   - no_pod_after_retries if automation ended without a POD
//!   - late_declaration     if the claim was declared too long after the incident
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::carrier::CarrierRegistry;
use crate::claims::{AcceptanceStats, Claim, ClaimRepository, ClaimStoreError, FetchAttempt, PodFetchStatus};

/// Tunable weights. Every field has a default, so a partial config table works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub baseline: f64,
    pub pod_retrieved: f64,
    /// Replaces `pod_retrieved` for a POD without a signature, which the
    /// carrier can still contest.
    pub pod_unsigned: f64,
    pub damage_evidence: f64,
    pub high_acceptance: f64,
    /// Acceptance rate at or above which `high_acceptance` applies.
    pub high_acceptance_threshold: f64,
    pub no_pod_after_retries: f64,
    pub late_declaration: f64,
    /// Declaration delay beyond which `late_declaration` applies.
    pub late_declaration_days: i64,
    /// Decided claims needed before history replaces the benchmark rate.
    pub min_decided_claims: i64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            baseline: 0.50,
            pod_retrieved: 0.20,
            pod_unsigned: 0.10,
            damage_evidence: 0.10,
            high_acceptance: 0.10,
            high_acceptance_threshold: 0.70,
            no_pod_after_retries: 0.20,
            late_declaration: 0.15,
            late_declaration_days: 30,
            min_decided_claims: 5,
        }
    }
}

/// Market acceptance benchmark for a dispute type, used without enough history.
#[must_use]
pub fn benchmark_acceptance_rate(dispute_type: &str) -> f64 {
    match dispute_type {
        "late_delivery" => 0.95,
        "lost" => 0.85,
        "damaged" => 0.45,
        "invalid_pod" => 0.30,
        _ => 0.50,
    }
}

/// Pure scoring function over a claim, its attempt log, and acceptance history.
#[derive(Debug, Clone, Default)]
pub struct Scorer {
    weights: ScoringWeights,
}

impl Scorer {
    #[must_use]
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    #[must_use]
    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Acceptance rate from history when there is enough of it, else the benchmark.
    #[must_use]
    pub fn acceptance_rate(&self, dispute_type: &str, stats: AcceptanceStats) -> f64 {
        match stats.rate() {
            Some(rate) if stats.decided > self.weights.min_decided_claims => rate,
            _ => benchmark_acceptance_rate(dispute_type),
        }
    }

    /// Scores a claim. `baseline` overrides the default carrier baseline.
    #[must_use]
    pub fn score(
        &self,
        claim: &Claim,
        attempts: &[FetchAttempt],
        acceptance: AcceptanceStats,
        baseline: Option<f64>,
    ) -> f64 {
        let w = &self.weights;
        let mut score = baseline.unwrap_or(w.baseline);

        let status = claim.pod_status();
        let pod_retrieved = status == PodFetchStatus::Success
            && claim
                .pod_url
                .as_deref()
                .is_some_and(|url| !url.trim().is_empty());
        if pod_retrieved {
            let signed = claim
                .pod_signature_ref
                .as_deref()
                .is_some_and(|signature| !signature.trim().is_empty());
            score += if signed { w.pod_retrieved } else { w.pod_unsigned };
        }

        if claim.has_damage_evidence {
            score += w.damage_evidence;
        }

        if self.acceptance_rate(&claim.dispute_type, acceptance) >= w.high_acceptance_threshold {
            score += w.high_acceptance;
        }

        let gave_up = matches!(
            status,
            PodFetchStatus::FailedFinal | PodFetchStatus::NotAvailable
        );
        if gave_up && !attempts.iter().any(FetchAttempt::is_success) {
            score -= w.no_pod_after_retries;
        }

        if claim
            .declaration_delay_days()
            .is_some_and(|days| days > w.late_declaration_days)
        {
            score -= w.late_declaration;
        }

        if score.is_nan() {
            return 0.0;
        }
        score.clamp(0.0, 1.0)
    }
}

/// Errors from [`ScoringService::rescore`].
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("claim not found: id {0}")]
    ClaimNotFound(i64),

    #[error(transparent)]
    Store(#[from] ClaimStoreError),
}

/// Loads a claim's inputs, scores it, and stores the result.
#[derive(Clone)]
pub struct ScoringService {
    repository: Arc<dyn ClaimRepository>,
    registry: Arc<CarrierRegistry>,
    scorer: Scorer,
}

impl std::fmt::Debug for ScoringService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringService")
            .field("scorer", &self.scorer)
            .finish_non_exhaustive()
    }
}

impl ScoringService {
    #[must_use]
    pub fn new(
        repository: Arc<dyn ClaimRepository>,
        registry: Arc<CarrierRegistry>,
        scorer: Scorer,
    ) -> Self {
        Self {
            repository,
            registry,
            scorer,
        }
    }

    /// Recomputes and stores `ai_success_probability` for a claim.
    ///
    /// # Errors
    ///
    /// Returns [`ScoringError::ClaimNotFound`] or a store error.
    #[instrument(skip(self))]
    pub async fn rescore(&self, claim_id: i64) -> Result<f64, ScoringError> {
        let claim = self
            .repository
            .get(claim_id)
            .await?
            .ok_or(ScoringError::ClaimNotFound(claim_id))?;
        let attempts = self.repository.list_attempts(claim_id).await?;
        let acceptance = self
            .repository
            .acceptance_stats(&claim.carrier, &claim.dispute_type)
            .await?;

        let score = self.scorer.score(
            &claim,
            &attempts,
            acceptance,
            self.registry.baseline_for(&claim.carrier),
        );
        self.repository.update_score(claim_id, score).await?;
        debug!(claim_ref = %claim.claim_reference, score, "claim scored");
        Ok(score)
    }

    /// Records uploaded damage evidence and re-scores the claim.
    ///
    /// # Errors
    ///
    /// Returns a store error if the claim does not exist or cannot be updated.
    #[instrument(skip(self))]
    pub async fn record_damage_evidence(&self, claim_id: i64) -> Result<f64, ScoringError> {
        self.repository.attach_damage_evidence(claim_id).await?;
        self.rescore(claim_id).await
    }
}
