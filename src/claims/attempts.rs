//! Immutable fetch attempt log.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Outcome recorded for one carrier call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    TemporaryError,
    PersistentError,
}

impl AttemptOutcome {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::TemporaryError => "temporary_error",
            Self::PersistentError => "persistent_error",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AttemptOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "temporary_error" => Ok(Self::TemporaryError),
            "persistent_error" => Ok(Self::PersistentError),
            _ => Err(format!("invalid attempt outcome: {s}")),
        }
    }
}

/// Row to insert into the attempt log.
#[derive(Debug, Clone)]
pub struct NewFetchAttempt<'a> {
    pub claim_id: i64,
    pub carrier: &'a str,
    pub attempted_at: DateTime<Utc>,
    /// Retry count the claim reached with this attempt (1 for the first call).
    pub attempt_number: i64,
    pub outcome: AttemptOutcome,
    pub error_code: Option<&'a str>,
    pub error_message: Option<&'a str>,
    pub unclassified: bool,
    pub latency_ms: i64,
}

/// Persisted attempt log row.
#[derive(Debug, Clone, FromRow)]
pub struct FetchAttempt {
    pub id: i64,
    pub claim_id: i64,
    pub carrier: String,
    pub attempted_at: DateTime<Utc>,
    pub attempt_number: i64,
    #[sqlx(rename = "outcome")]
    pub outcome_str: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub unclassified: bool,
    pub latency_ms: i64,
}

impl FetchAttempt {
    /// Parsed outcome. Unreadable rows count as temporary errors.
    #[must_use]
    pub fn outcome(&self) -> AttemptOutcome {
        self.outcome_str
            .parse()
            .unwrap_or(AttemptOutcome::TemporaryError)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome() == AttemptOutcome::Success
    }
}
