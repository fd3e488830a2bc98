//! Error types for POD fetch calls.
//!
//! A [`FetchError`] is the raw failure of one carrier call. It is never
//! classified here; see [`super::classify_error`].

use std::time::Duration;

use thiserror::Error;

/// Raw failure of one carrier call.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The call did not complete within the per-attempt timeout.
    #[error("timeout after {}s calling {carrier}", .after.as_secs())]
    Timeout {
        carrier: String,
        after: Duration,
    },

    /// DNS, connect, TLS, or body transfer failure.
    #[error("connection error calling {carrier}: {message}")]
    Connection { carrier: String, message: String },

    /// Non-success HTTP status from the carrier API.
    #[error("HTTP {status} from {carrier}: {message}")]
    HttpStatus {
        carrier: String,
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The carrier answered but reported an error in its payload.
    #[error("{carrier} error{}: {message}", code_suffix(.code))]
    Carrier {
        carrier: String,
        code: Option<String>,
        message: String,
    },

    /// No adapter is registered for this carrier.
    #[error(
        "carrier not supported: {carrier}\n  Suggestion: Add a [carriers.{carrier}] section to the config file"
    )]
    UnsupportedCarrier { carrier: String },

    /// The carrier answered with a payload we could not interpret.
    #[error("invalid response from {carrier}: {message}")]
    InvalidResponse { carrier: String, message: String },
}

#[allow(clippy::ref_option)]
fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" {c}")).unwrap_or_default()
}

impl FetchError {
    pub fn timeout(carrier: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            carrier: carrier.into(),
            after,
        }
    }

    pub fn connection(carrier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            carrier: carrier.into(),
            message: message.into(),
        }
    }

    pub fn http_status(carrier: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::HttpStatus {
            carrier: carrier.into(),
            status,
            message: message.into(),
        }
    }

    pub fn carrier(
        carrier: impl Into<String>,
        code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Carrier {
            carrier: carrier.into(),
            code,
            message: message.into(),
        }
    }

    pub fn unsupported(carrier: impl Into<String>) -> Self {
        Self::UnsupportedCarrier {
            carrier: carrier.into(),
        }
    }

    pub fn invalid_response(carrier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            carrier: carrier.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable code for the attempt log.
    #[must_use]
    pub fn code(&self) -> Option<String> {
        match self {
            Self::Timeout { .. } => Some("timeout".to_string()),
            Self::Connection { .. } => Some("connection".to_string()),
            Self::HttpStatus { status, .. } => Some(status.to_string()),
            Self::Carrier { code, .. } => code.clone(),
            Self::UnsupportedCarrier { .. } => Some("unsupported_carrier".to_string()),
            Self::InvalidResponse { .. } => Some("invalid_response".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_messages() {
        let err = FetchError::timeout("ups", Duration::from_secs(30));
        assert_eq!(err.to_string(), "timeout after 30s calling ups");

        let err = FetchError::carrier("dhl", Some("E42".to_string()), "tracking number invalid");
        assert_eq!(err.to_string(), "dhl error E42: tracking number invalid");

        let err = FetchError::carrier("dhl", None, "busy");
        assert_eq!(err.to_string(), "dhl error: busy");
    }

    #[test]
    fn test_unsupported_carrier_has_suggestion() {
        let msg = FetchError::unsupported("gls").to_string();
        assert!(msg.contains("gls"));
        assert!(msg.contains("Suggestion"));
    }

    #[test]
    fn test_fetch_error_codes() {
        assert_eq!(
            FetchError::http_status("ups", 503, "down").code().as_deref(),
            Some("503")
        );
        assert_eq!(FetchError::carrier("ups", None, "x").code(), None);
    }
}
