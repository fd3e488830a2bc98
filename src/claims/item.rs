//! Claim records and POD fetch status definitions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// POD acquisition status of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodFetchStatus {
    /// Claim exists but no POD fetch has been requested.
    NotRequested,
    /// Waiting for its first automated attempt.
    Pending,
    /// POD document recovered.
    Success,
    /// Last attempt failed with a temporary error; eligible again after backoff.
    Failed,
    /// No further automated attempts.
    FailedFinal,
    /// Nothing to fetch (no tracking reference).
    NotAvailable,
    /// Handed to an operator; never attempted automatically.
    Manual,
}

impl PodFetchStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::NotRequested,
        Self::Pending,
        Self::Success,
        Self::Failed,
        Self::FailedFinal,
        Self::NotAvailable,
        Self::Manual,
    ];

    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRequested => "not_requested",
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::FailedFinal => "failed_final",
            Self::NotAvailable => "not_available",
            Self::Manual => "manual",
        }
    }

    /// True for states the scheduler will never leave on its own.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::FailedFinal | Self::NotAvailable | Self::Manual
        )
    }

    /// True for states the scheduler may select.
    #[must_use]
    pub fn is_schedulable(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

impl fmt::Display for PodFetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PodFetchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_requested" => Ok(Self::NotRequested),
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "failed_final" => Ok(Self::FailedFinal),
            "not_available" => Ok(Self::NotAvailable),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("invalid pod fetch status: {s}")),
        }
    }
}

/// Input for [`super::ClaimStore::create_claim`].
#[derive(Debug, Clone, Default)]
pub struct NewClaim {
    pub claim_reference: String,
    pub carrier: String,
    pub tracking_number: Option<String>,
    /// `lost`, `damaged`, `late_delivery`, `invalid_pod`, or free text.
    pub dispute_type: String,
    pub has_damage_evidence: bool,
    pub incident_at: Option<DateTime<Utc>>,
    pub declared_at: Option<DateTime<Utc>>,
}

/// A claim row.
#[derive(Debug, Clone, FromRow)]
pub struct Claim {
    pub id: i64,
    pub claim_reference: String,
    pub carrier: String,
    pub tracking_number: Option<String>,
    pub dispute_type: String,
    /// Outcome of the carrier claim itself (`open`, `accepted`, `rejected`, ...).
    pub claim_status: String,
    pub has_damage_evidence: bool,
    pub incident_at: Option<DateTime<Utc>>,
    pub declared_at: Option<DateTime<Utc>>,
    /// Stored as text, parsed via `pod_status()`.
    #[sqlx(rename = "pod_fetch_status")]
    pub pod_status_str: String,
    /// Recovered document reference.
    pub pod_url: Option<String>,
    pub pod_fetch_error: Option<String>,
    /// Number of admitted fetch attempts.
    pub pod_retry_count: i64,
    pub pod_last_retry_at: Option<DateTime<Utc>>,
    pub pod_next_eligible_at: Option<DateTime<Utc>>,
    pub pod_fetched_at: Option<DateTime<Utc>>,
    pub pod_delivery_person: Option<String>,
    pub pod_delivered_at: Option<DateTime<Utc>>,
    /// Signature image reference from the POD, when the carrier supplies one.
    pub pod_signature_ref: Option<String>,
    /// Set when an unclassified error drove the claim to a terminal state.
    pub pod_needs_audit: bool,
    pub ai_success_probability: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Claim {
    /// Returns the parsed POD status.
    ///
    /// Falls back to `Manual` if the stored string is invalid, which keeps an
    /// unreadable row out of automation.
    #[must_use]
    pub fn pod_status(&self) -> PodFetchStatus {
        self.pod_status_str.parse().unwrap_or(PodFetchStatus::Manual)
    }

    /// Tracking reference, if present and non-blank.
    #[must_use]
    pub fn tracking(&self) -> Option<&str> {
        self.tracking_number
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Days between the incident and the declaration, when both are known.
    #[must_use]
    pub fn declaration_delay_days(&self) -> Option<i64> {
        match (self.incident_at, self.declared_at) {
            (Some(incident), Some(declared)) => Some((declared - incident).num_days()),
            _ => None,
        }
    }
}

impl fmt::Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Claim {{ ref: {}, carrier: {}, pod: {}, attempts: {} }}",
            self.claim_reference,
            self.carrier,
            self.pod_status(),
            self.pod_retry_count
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn sample_claim() -> Claim {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        Claim {
            id: 1,
            claim_reference: "CLM-1".to_string(),
            carrier: "ups".to_string(),
            tracking_number: Some("1Z999AA10123456784".to_string()),
            dispute_type: "lost".to_string(),
            claim_status: "open".to_string(),
            has_damage_evidence: false,
            incident_at: None,
            declared_at: None,
            pod_status_str: "pending".to_string(),
            pod_url: None,
            pod_fetch_error: None,
            pod_retry_count: 0,
            pod_last_retry_at: None,
            pod_next_eligible_at: None,
            pod_fetched_at: None,
            pod_delivery_person: None,
            pod_delivered_at: None,
            pod_signature_ref: None,
            pod_needs_audit: false,
            ai_success_probability: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_pod_status_round_trips_through_str() {
        for status in PodFetchStatus::ALL {
            assert_eq!(status.as_str().parse::<PodFetchStatus>().unwrap(), status);
            assert_eq!(status.to_string(), status.as_str());
        }
    }

    #[test]
    fn test_pod_status_rejects_unknown() {
        let err = "in_progress".parse::<PodFetchStatus>().unwrap_err();
        assert!(err.contains("in_progress"));
    }

    #[test]
    fn test_terminal_and_schedulable_are_disjoint() {
        for status in PodFetchStatus::ALL {
            assert!(!(status.is_terminal() && status.is_schedulable()));
        }
        assert!(PodFetchStatus::Manual.is_terminal());
        assert!(PodFetchStatus::Failed.is_schedulable());
        assert!(!PodFetchStatus::NotRequested.is_schedulable());
    }

    #[test]
    fn test_invalid_stored_status_falls_back_to_manual() {
        let mut claim = sample_claim();
        claim.pod_status_str = "garbage".to_string();
        assert_eq!(claim.pod_status(), PodFetchStatus::Manual);
    }

    #[test]
    fn test_tracking_ignores_blank() {
        let mut claim = sample_claim();
        assert_eq!(claim.tracking(), Some("1Z999AA10123456784"));
        claim.tracking_number = Some("   ".to_string());
        assert_eq!(claim.tracking(), None);
    }

    #[test]
    fn test_declaration_delay_days() {
        let mut claim = sample_claim();
        assert_eq!(claim.declaration_delay_days(), None);
        let incident = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        claim.incident_at = Some(incident);
        claim.declared_at = Some(incident + Duration::days(45));
        assert_eq!(claim.declaration_delay_days(), Some(45));
    }
}
