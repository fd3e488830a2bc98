//! Error classification and the backoff schedule for failed POD fetches.
//!
//! # Overview
//!
//! Every raw [`FetchError`] is mapped to an [`ErrorClass`]:
//! - [`ErrorClass::Temporary`] - may succeed later; retried on the backoff schedule
//! - [`ErrorClass::Persistent`] - needs a human to fix the claim; never retried
//!
//! Errors that match no taxonomy entry are treated as temporary but carry
//! `unclassified = true`, so they are logged distinctly and a claim that
//! exhausts its attempts through one is flagged for audit.
//!
//! [`RetryPolicy`] then turns a classification and the claim's retry count
//! into a [`RetryDecision`].
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use podfetch_core::fetch::{classify_error, FetchError, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let error = FetchError::http_status("ups", 503, "Service Unavailable");
//! let classification = classify_error(&error);
//!
//! match policy.decide(classification, 1, Utc::now()) {
//!     RetryDecision::RetryAt(when) => println!("retry after {when}"),
//!     RetryDecision::Finalize { .. } => println!("giving up"),
//! }
//! ```

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument};

use super::FetchError;

/// Default maximum number of attempts per claim.
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// Default backoff steps in hours, indexed by attempt number.
pub const DEFAULT_BACKOFF_HOURS: [u64; 4] = [1, 6, 24, 72];

/// Message fragments for errors a retry cannot fix. Checked first.
const PERSISTENT_KEYWORDS: &[&str] = &[
    "not found",
    "tracking number invalid",
    "invalid tracking",
    "malformed tracking",
    "tracking not found",
    "numéro invalide",
    "numéro introuvable",
    "pod not available",
    "pod document not available",
    "no pod",
    "pod non disponible",
    "carrier not supported",
    "transporteur non supporté",
    "authentication failed",
    "invalid credentials",
    "unauthorized",
    "forbidden",
    "access denied",
    "accès refusé",
    "account suspended",
    "compte suspendu",
];

/// Message fragments for errors that resolve on their own.
const TEMPORARY_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "rate limit",
    "too many requests",
    "not yet delivered",
    "not delivered yet",
    "not yet generated",
    "not yet available",
    "pas encore livré",
    "pas encore généré",
    "en cours de livraison",
    "in transit",
    "temporary",
    "temporarily",
    "temporaire",
    "try again",
    "retry",
    "unavailable",
];

/// Whether a failure may succeed on a later attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Temporary,
    Persistent,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Temporary => "temporary",
            Self::Persistent => "persistent",
        })
    }
}

/// Log severity derived from a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
        })
    }
}

/// Result of classifying one raw error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub class: ErrorClass,
    /// No taxonomy entry matched; `class` is the Temporary default.
    pub unclassified: bool,
    /// The carrier told us to slow down.
    pub rate_limited: bool,
}

impl Classification {
    const fn temporary() -> Self {
        Self {
            class: ErrorClass::Temporary,
            unclassified: false,
            rate_limited: false,
        }
    }

    const fn persistent() -> Self {
        Self {
            class: ErrorClass::Persistent,
            unclassified: false,
            rate_limited: false,
        }
    }

    const fn rate_limited() -> Self {
        Self {
            class: ErrorClass::Temporary,
            unclassified: false,
            rate_limited: true,
        }
    }

    const fn unknown() -> Self {
        Self {
            class: ErrorClass::Temporary,
            unclassified: true,
            rate_limited: false,
        }
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.class == ErrorClass::Persistent
    }

    #[must_use]
    pub fn severity(&self) -> ErrorSeverity {
        if self.is_persistent() {
            ErrorSeverity::Critical
        } else if self.rate_limited {
            ErrorSeverity::Warning
        } else {
            ErrorSeverity::Info
        }
    }
}

/// Classifies a raw fetch error.
///
/// # HTTP Status Classification
///
/// | Status | Class |
/// |--------|-------|
/// | 400, 404, 410, 422 | Persistent (bad or unknown tracking reference) |
/// | 401, 403 | Persistent (credentials) |
///
/// For the Persistent statuses a body that reads as temporary ("not yet
/// generated", "rate limit exceeded, try again later") takes precedence.
/// Persistent body keywords still win over temporary ones.
/// | 408 | Temporary |
/// | 429 | Temporary, rate limited |
/// | 5xx | Temporary |
/// | other | by message keywords, else unclassified |
#[instrument(level = "debug")]
pub fn classify_error(error: &FetchError) -> Classification {
    match error {
        FetchError::Timeout { .. } | FetchError::Connection { .. } => Classification::temporary(),
        FetchError::UnsupportedCarrier { .. } => Classification::persistent(),
        FetchError::HttpStatus {
            status, message, ..
        } => classify_http_status(*status, message),
        FetchError::Carrier { message, .. } => classify_message(message),
        FetchError::InvalidResponse { .. } => Classification::unknown(),
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16, message: &str) -> Classification {
    match status {
        400 | 401 | 403 | 404 | 410 | 422 => {
            let by_message = classify_message(message);
            if by_message.is_persistent() || by_message.unclassified {
                Classification::persistent()
            } else {
                by_message
            }
        }
        408 => Classification::temporary(),
        429 => Classification::rate_limited(),
        500..=599 => Classification::temporary(),
        _ => classify_message(message),
    }
}

/// Classifies a carrier error message by keyword. Persistent keywords win.
#[must_use]
pub fn classify_message(message: &str) -> Classification {
    let lower = message.to_lowercase();
    if lower.trim().is_empty() {
        return Classification::unknown();
    }
    if PERSISTENT_KEYWORDS.iter().any(|keyword| lower.contains(keyword)) {
        return Classification::persistent();
    }
    if lower.contains("rate limit") || lower.contains("too many requests") {
        return Classification::rate_limited();
    }
    if TEMPORARY_KEYWORDS.iter().any(|keyword| lower.contains(keyword)) {
        return Classification::temporary();
    }
    Classification::unknown()
}

/// Fixed waits between attempts, indexed by attempt number (1-based).
///
/// Attempts beyond the last step reuse the last step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    steps: Vec<Duration>,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::from_hours(&DEFAULT_BACKOFF_HOURS)
    }
}

impl BackoffSchedule {
    /// Builds a schedule from hour steps. An empty slice yields the default.
    #[must_use]
    pub fn from_hours(hours: &[u64]) -> Self {
        if hours.is_empty() {
            return Self::default();
        }
        let steps = hours
            .iter()
            .map(|h| {
                i64::try_from(*h)
                    .ok()
                    .and_then(Duration::try_hours)
                    .unwrap_or(Duration::MAX)
            })
            .collect();
        Self { steps }
    }

    /// Wait after the `attempt`-th failure (1-based; 0 is treated as 1).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = usize::try_from(attempt.saturating_sub(1)).unwrap_or(usize::MAX);
        self.steps
            .get(index)
            .or_else(|| self.steps.last())
            .copied()
            .unwrap_or_else(|| Duration::hours(1))
    }

    #[must_use]
    pub fn steps(&self) -> &[Duration] {
        &self.steps
    }
}

/// What to do with a claim after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Leave the claim `failed`, eligible again at this instant.
    RetryAt(DateTime<Utc>),
    /// Move the claim to `failed_final`.
    Finalize {
        persistent: bool,
        /// An unclassified error exhausted the claim's attempts.
        needs_audit: bool,
    },
}

/// Retry limit plus backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    schedule: BackoffSchedule,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            schedule: BackoffSchedule::default(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_retries` is at least 1.
    #[must_use]
    pub fn new(max_retries: u32, schedule: BackoffSchedule) -> Self {
        Self {
            max_retries: max_retries.max(1),
            schedule,
        }
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn schedule(&self) -> &BackoffSchedule {
        &self.schedule
    }

    /// Decides the next step for a claim whose attempt number `retry_count`
    /// (already incremented for this attempt) just failed.
    #[must_use]
    pub fn decide(
        &self,
        classification: Classification,
        retry_count: u32,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        if classification.is_persistent() {
            return RetryDecision::Finalize {
                persistent: true,
                needs_audit: false,
            };
        }

        if retry_count >= self.max_retries {
            debug!(retry_count, max = self.max_retries, "max retries reached");
            return RetryDecision::Finalize {
                persistent: false,
                needs_audit: classification.unclassified,
            };
        }

        let delay = self.schedule.delay_for(retry_count);
        debug!(retry_count, delay_hours = delay.num_hours(), "will retry");
        match now.checked_add_signed(delay) {
            Some(at) => RetryDecision::RetryAt(at),
            None => RetryDecision::Finalize {
                persistent: false,
                needs_audit: classification.unclassified,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    // ==================== Classification Tests ====================

    #[test]
    fn test_classify_timeout_and_connection_temporary() {
        let timeout = classify_error(&FetchError::timeout("ups", std::time::Duration::from_secs(30)));
        assert_eq!(timeout.class, ErrorClass::Temporary);
        assert!(!timeout.unclassified);

        let conn = classify_error(&FetchError::connection("ups", "connection refused"));
        assert_eq!(conn.class, ErrorClass::Temporary);
    }

    #[test]
    fn test_classify_http_statuses() {
        for status in [500, 502, 503, 504, 408] {
            let c = classify_error(&FetchError::http_status("ups", status, ""));
            assert_eq!(c.class, ErrorClass::Temporary, "status {status}");
        }
        for status in [400, 401, 403, 404, 410, 422] {
            let c = classify_error(&FetchError::http_status("ups", status, ""));
            assert_eq!(c.class, ErrorClass::Persistent, "status {status}");
        }
        let limited = classify_error(&FetchError::http_status("ups", 429, ""));
        assert!(limited.rate_limited);
        assert_eq!(limited.severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn test_client_error_status_with_temporary_body_is_retried() {
        let c = classify_error(&FetchError::http_status(
            "ups",
            404,
            "POD document not yet generated",
        ));
        assert_eq!(c.class, ErrorClass::Temporary);
        assert!(!c.unclassified);

        let c = classify_error(&FetchError::http_status(
            "ups",
            403,
            "Rate limit exceeded, try again later",
        ));
        assert_eq!(c.class, ErrorClass::Temporary);
        assert!(c.rate_limited);
    }

    #[test]
    fn test_client_error_status_keeps_persistent_verdict() {
        for (status, body) in [
            (404, "Not Found"),
            (404, "tracking not found, try again"),
            (403, "Access denied"),
            (400, "Bad Request"),
            (422, "unprocessable"),
        ] {
            let c = classify_error(&FetchError::http_status("ups", status, body));
            assert_eq!(c.class, ErrorClass::Persistent, "{status} {body}");
            assert!(!c.unclassified);
        }
    }

    #[test]
    fn test_classify_other_status_uses_message() {
        let c = classify_error(&FetchError::http_status("ups", 409, "try again later"));
        assert_eq!(c.class, ErrorClass::Temporary);
        assert!(!c.unclassified);

        let c = classify_error(&FetchError::http_status("ups", 409, "conflict"));
        assert!(c.unclassified);
    }

    #[test]
    fn test_classify_carrier_messages() {
        let persistent = [
            "Tracking number invalid",
            "Numéro invalide",
            "POD non disponible pour ce type d'envoi",
            "Access denied",
            "No POD exists for this shipment type",
        ];
        for message in persistent {
            let c = classify_message(message);
            assert_eq!(c.class, ErrorClass::Persistent, "{message}");
            assert_eq!(c.severity(), ErrorSeverity::Critical);
        }

        let temporary = [
            "Document not yet generated",
            "Colis pas encore livré",
            "Service temporairement indisponible (temporaire)",
            "Rate limit exceeded",
        ];
        for message in temporary {
            let c = classify_message(message);
            assert_eq!(c.class, ErrorClass::Temporary, "{message}");
            assert!(!c.unclassified, "{message}");
        }
    }

    #[test]
    fn test_persistent_keywords_checked_first() {
        let c = classify_message("tracking not found, please retry");
        assert_eq!(c.class, ErrorClass::Persistent);
    }

    #[test]
    fn test_unknown_message_is_unclassified_temporary() {
        let c = classify_message("the flux capacitor is misaligned");
        assert_eq!(c.class, ErrorClass::Temporary);
        assert!(c.unclassified);
        assert_eq!(c.severity(), ErrorSeverity::Info);

        assert!(classify_message("").unclassified);
        assert!(classify_error(&FetchError::invalid_response("ups", "not json")).unclassified);
    }

    #[test]
    fn test_unsupported_carrier_is_persistent() {
        let c = classify_error(&FetchError::unsupported("gls"));
        assert!(c.is_persistent());
    }

    // ==================== Backoff Tests ====================

    #[test]
    fn test_default_backoff_schedule() {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.delay_for(1), Duration::hours(1));
        assert_eq!(schedule.delay_for(2), Duration::hours(6));
        assert_eq!(schedule.delay_for(3), Duration::hours(24));
        assert_eq!(schedule.delay_for(4), Duration::hours(72));
        assert_eq!(schedule.delay_for(9), Duration::hours(72));
        assert_eq!(schedule.delay_for(0), Duration::hours(1));
    }

    #[test]
    fn test_backoff_is_monotonic() {
        let schedule = BackoffSchedule::default();
        for attempt in 1..8 {
            assert!(schedule.delay_for(attempt + 1) >= schedule.delay_for(attempt));
        }
    }

    #[test]
    fn test_custom_backoff_and_empty_fallback() {
        let schedule = BackoffSchedule::from_hours(&[2, 4]);
        assert_eq!(schedule.delay_for(1), Duration::hours(2));
        assert_eq!(schedule.delay_for(3), Duration::hours(4));
        assert_eq!(BackoffSchedule::from_hours(&[]), BackoffSchedule::default());
    }

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_policy_minimum_max_retries() {
        assert_eq!(RetryPolicy::new(0, BackoffSchedule::default()).max_retries(), 1);
        assert_eq!(RetryPolicy::default().max_retries(), DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_policy_retries_temporary_below_limit() {
        let policy = RetryPolicy::default();
        let decision = policy.decide(Classification::temporary(), 1, now());
        assert_eq!(decision, RetryDecision::RetryAt(now() + Duration::hours(1)));

        let decision = policy.decide(Classification::temporary(), 3, now());
        assert_eq!(decision, RetryDecision::RetryAt(now() + Duration::hours(24)));
    }

    #[test]
    fn test_policy_finalizes_at_limit() {
        let policy = RetryPolicy::default();
        let decision = policy.decide(Classification::temporary(), 4, now());
        assert_eq!(
            decision,
            RetryDecision::Finalize {
                persistent: false,
                needs_audit: false
            }
        );
    }

    #[test]
    fn test_policy_persistent_finalizes_immediately() {
        let policy = RetryPolicy::default();
        let decision = policy.decide(Classification::persistent(), 1, now());
        assert_eq!(
            decision,
            RetryDecision::Finalize {
                persistent: true,
                needs_audit: false
            }
        );
    }

    #[test]
    fn test_policy_flags_exhausted_unclassified_for_audit() {
        let policy = RetryPolicy::new(2, BackoffSchedule::default());
        assert!(matches!(
            policy.decide(Classification::unknown(), 1, now()),
            RetryDecision::RetryAt(_)
        ));
        assert_eq!(
            policy.decide(Classification::unknown(), 2, now()),
            RetryDecision::Finalize {
                persistent: false,
                needs_audit: true
            }
        );
    }
}
