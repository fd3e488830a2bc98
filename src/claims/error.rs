//! Error types for claim store operations.

use std::fmt;

use thiserror::Error;

/// Coarse kind of a database failure, enough to tell a busy database from
/// bad data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// `SQLITE_BUSY` / `SQLITE_LOCKED`, or the pool ran out of connections.
    BusyOrLocked,
    /// Unique, check or foreign-key constraint (e.g. a duplicate claim reference).
    ConstraintViolation,
    RowNotFound,
    Other,
}

impl DbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::BusyOrLocked,
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::Database(db) => {
                let code = db.code();
                let code = code.as_deref().unwrap_or_default();
                if matches!(code, "5" | "6" | "SQLITE_BUSY" | "SQLITE_LOCKED")
                    || db.message().contains("database is locked")
                {
                    Self::BusyOrLocked
                } else if db.is_unique_violation()
                    || db.is_check_violation()
                    || db.is_foreign_key_violation()
                    || code.starts_with("SQLITE_CONSTRAINT")
                {
                    Self::ConstraintViolation
                } else {
                    Self::Other
                }
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BusyOrLocked => "busy",
            Self::ConstraintViolation => "constraint",
            Self::RowNotFound => "not_found",
            Self::Other => "other",
        })
    }
}

/// Errors that can occur during claim store operations.
#[derive(Debug, Clone, Error)]
pub enum ClaimStoreError {
    /// Database operation failed.
    #[error("database error ({kind}): {message}")]
    Database {
        /// Typed classification of the failure.
        kind: DbErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// No claim with this id.
    #[error("claim not found: id {0}")]
    ClaimNotFound(i64),

    /// No claim with this reference.
    #[error(
        "claim not found: reference '{0}'\n  Suggestion: Check the claim reference with `podfetch status`"
    )]
    ReferenceNotFound(String),

    /// The requested transition is not allowed from the claim's current status.
    #[error("claim {id}: cannot move from '{from}' to '{to}'")]
    InvalidTransition {
        /// Claim id.
        id: i64,
        /// Status the claim is in.
        from: String,
        /// Status that was requested.
        to: String,
    },

    /// The claim changed between selection and outcome recording.
    #[error("claim {0} changed since it was selected; outcome not applied")]
    StaleClaim(i64),

    /// No carrier given and the tracking number format is not recognized.
    #[error(
        "cannot determine carrier for claim '{0}'\n  Suggestion: Set the carrier explicitly; the tracking number format is not recognized"
    )]
    UnknownCarrier(String),

    /// A score outside `[0, 1]` was offered.
    #[error("score {0} is outside [0, 1]")]
    ScoreOutOfRange(f64),
}

impl From<sqlx::Error> for ClaimStoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: DbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl ClaimStoreError {
    #[must_use]
    pub fn database_kind(&self) -> Option<DbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Another writer held the database; retrying later may succeed.
    #[must_use]
    pub fn is_busy_or_locked(&self) -> bool {
        self.database_kind() == Some(DbErrorKind::BusyOrLocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_store_error_database_message() {
        let err = ClaimStoreError::Database {
            kind: DbErrorKind::Other,
            message: "connection failed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("database error"));
        assert!(msg.contains("other"));
        assert!(msg.contains("connection failed"));
    }

    #[test]
    fn test_claim_store_error_busy_flag() {
        let err = ClaimStoreError::Database {
            kind: DbErrorKind::BusyOrLocked,
            message: "database is locked".to_string(),
        };
        assert!(err.is_busy_or_locked());
        assert!(!ClaimStoreError::ClaimNotFound(1).is_busy_or_locked());
    }

    #[test]
    fn test_reference_not_found_has_suggestion() {
        let msg = ClaimStoreError::ReferenceNotFound("CLM-9".to_string()).to_string();
        assert!(msg.contains("CLM-9"));
        assert!(msg.contains("Suggestion"));
    }

    #[test]
    fn test_row_not_found_kind() {
        assert_eq!(
            DbErrorKind::from_sqlx(&sqlx::Error::RowNotFound),
            DbErrorKind::RowNotFound
        );
        assert_eq!(DbErrorKind::RowNotFound.to_string(), "not_found");
        assert_eq!(
            DbErrorKind::from_sqlx(&sqlx::Error::PoolTimedOut),
            DbErrorKind::BusyOrLocked
        );
    }
}
