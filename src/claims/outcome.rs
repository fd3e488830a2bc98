//! Outcome of one admitted fetch attempt, as persisted by
//! [`super::ClaimStore::record_outcome`].

use chrono::{DateTime, Utc};

use super::{AttemptOutcome, PodFetchStatus};
use crate::carrier::PodDocument;

/// Error details carried into the claim row and the attempt log.
#[derive(Debug, Clone, Copy)]
pub struct AttemptError<'a> {
    /// Carrier or transport error code, when one exists.
    pub code: Option<&'a str>,
    pub message: &'a str,
    /// No taxonomy entry matched this error.
    pub unclassified: bool,
}

/// New state for the claim after an attempt.
#[derive(Debug, Clone, Copy)]
pub enum ClaimTransition<'a> {
    /// POD recovered; the claim becomes `success`.
    Retrieved(&'a PodDocument),
    /// Temporary failure; the claim becomes `failed` until `next_eligible_at`.
    RetryLater {
        error: AttemptError<'a>,
        next_eligible_at: DateTime<Utc>,
    },
    /// No more automated attempts; the claim becomes `failed_final`.
    Finalized {
        error: AttemptError<'a>,
        persistent: bool,
        needs_audit: bool,
    },
}

impl ClaimTransition<'_> {
    /// Status written to the claim.
    #[must_use]
    pub fn target_status(&self) -> PodFetchStatus {
        match self {
            Self::Retrieved(_) => PodFetchStatus::Success,
            Self::RetryLater { .. } => PodFetchStatus::Failed,
            Self::Finalized { .. } => PodFetchStatus::FailedFinal,
        }
    }

    /// Outcome written to the attempt log.
    #[must_use]
    pub fn attempt_outcome(&self) -> AttemptOutcome {
        match self {
            Self::Retrieved(_) => AttemptOutcome::Success,
            Self::RetryLater { .. } => AttemptOutcome::TemporaryError,
            Self::Finalized { persistent: true, .. } => AttemptOutcome::PersistentError,
            Self::Finalized { .. } => AttemptOutcome::TemporaryError,
        }
    }

    fn error(&self) -> Option<&AttemptError<'_>> {
        match self {
            Self::Retrieved(_) => None,
            Self::RetryLater { error, .. } | Self::Finalized { error, .. } => Some(error),
        }
    }

    pub(crate) fn error_code(&self) -> Option<&str> {
        self.error().and_then(|error| error.code)
    }

    pub(crate) fn error_message(&self) -> Option<&str> {
        self.error().map(|error| error.message)
    }

    pub(crate) fn unclassified(&self) -> bool {
        self.error().is_some_and(|error| error.unclassified)
    }
}

/// Everything [`super::ClaimStore::record_outcome`] needs for one attempt.
///
/// `selected_status` and `selected_retry_count` are the values read when the
/// claim was selected; the update only applies if they still hold.
#[derive(Debug, Clone, Copy)]
pub struct OutcomeRecord<'a> {
    pub claim_id: i64,
    pub carrier: &'a str,
    pub selected_status: PodFetchStatus,
    pub selected_retry_count: i64,
    pub attempted_at: DateTime<Utc>,
    pub latency_ms: i64,
    pub transition: ClaimTransition<'a>,
}

impl OutcomeRecord<'_> {
    /// Retry count after this attempt.
    #[must_use]
    pub fn attempt_number(&self) -> i64 {
        self.selected_retry_count + 1
    }
}

/// A POD already retrieved for the same shipment by another claim.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPod {
    /// Claim the document was fetched for.
    pub source_claim_id: i64,
    pub document: PodDocument,
    /// When the carrier returned it. Kept on reuse, so the cache age never
    /// resets.
    pub fetched_at: DateTime<Utc>,
}
