//! Configurable JSON-over-HTTPS carrier adapter.
//!
//! The adapter calls `GET {base_url}/pod/{tracking}` and expects a JSON body:
//!
//! ```json
//! {
//!   "success": true,
//!   "pod_url": "https://carrier.example/pod/123.pdf",
//!   "pod_data": {
//!     "delivery_date": "2026-03-01T10:15:00Z",
//!     "recipient_name": "J. Martin",
//!     "signature_url": null
//!   },
//!   "error": null,
//!   "error_code": null
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use super::{CarrierAdapter, PodDocument};
use crate::fetch::FetchError;
use crate::user_agent;

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Longest error body kept in an error message.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Failure to construct an [`HttpCarrierAdapter`].
#[derive(Debug, Error)]
pub enum AdapterBuildError {
    #[error("invalid base URL for carrier {carrier}: {source}")]
    InvalidBaseUrl {
        carrier: String,
        #[source]
        source: url::ParseError,
    },

    #[error("base URL for carrier {carrier} cannot carry a path: {url}")]
    CannotBeABase { carrier: String, url: String },

    #[error("failed to build HTTP client for carrier {carrier}: {source}")]
    Client {
        carrier: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Builds the HTTP client used by carrier adapters.
///
/// # Errors
///
/// Returns the reqwest error when client construction fails.
pub fn build_carrier_http_client(request_timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(request_timeout))
        .timeout(request_timeout)
        .user_agent(user_agent::default_user_agent())
        .gzip(true)
        .build()
}

#[derive(Debug, Deserialize)]
struct PodResponse {
    #[serde(default)]
    success: bool,
    pod_url: Option<String>,
    #[serde(default)]
    pod_data: PodData,
    error: Option<String>,
    error_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PodData {
    delivery_date: Option<String>,
    recipient_name: Option<String>,
    signature_url: Option<String>,
}

/// Carrier adapter for APIs that speak the JSON contract above.
#[derive(Debug, Clone)]
pub struct HttpCarrierAdapter {
    carrier: String,
    base_url: Url,
    api_key: Option<String>,
    request_timeout: Duration,
    client: Client,
}

impl HttpCarrierAdapter {
    /// Creates an adapter for `carrier` rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterBuildError`] for an unusable base URL or when the
    /// HTTP client cannot be built.
    pub fn new(
        carrier: impl Into<String>,
        base_url: &str,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, AdapterBuildError> {
        let carrier = carrier.into().to_ascii_lowercase();
        let base_url = Url::parse(base_url).map_err(|source| AdapterBuildError::InvalidBaseUrl {
            carrier: carrier.clone(),
            source,
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AdapterBuildError::CannotBeABase {
                carrier,
                url: base_url.to_string(),
            });
        }
        let client =
            build_carrier_http_client(request_timeout).map_err(|source| AdapterBuildError::Client {
                carrier: carrier.clone(),
                source,
            })?;

        Ok(Self {
            carrier,
            base_url,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            request_timeout,
            client,
        })
    }

    fn pod_url(&self, tracking_ref: &str) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| FetchError::invalid_response(&self.carrier, "base URL cannot carry a path"))?
            .pop_if_empty()
            .push("pod")
            .push(tracking_ref.trim());
        Ok(url)
    }

    fn map_transport_error(&self, error: &reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::timeout(&self.carrier, self.request_timeout)
        } else if error.is_decode() {
            FetchError::invalid_response(&self.carrier, error.to_string())
        } else {
            FetchError::connection(&self.carrier, error.to_string())
        }
    }
}

#[async_trait]
impl CarrierAdapter for HttpCarrierAdapter {
    fn carrier(&self) -> &str {
        &self.carrier
    }

    #[instrument(skip(self), fields(carrier = %self.carrier))]
    async fn fetch_pod(&self, tracking_ref: &str) -> Result<PodDocument, FetchError> {
        let url = self.pod_url(tracking_ref)?;
        debug!(url = %url, "requesting POD");

        let mut request = self.client.get(url).header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<PodResponse>(&body)
                .ok()
                .and_then(|parsed| parsed.error)
                .unwrap_or_else(|| truncate(&body));
            let message = if message.trim().is_empty() {
                status.canonical_reason().unwrap_or("").to_string()
            } else {
                message
            };
            return Err(FetchError::http_status(&self.carrier, status.as_u16(), message));
        }

        let parsed: PodResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::invalid_response(&self.carrier, e.to_string()))?;
        into_document(&self.carrier, parsed)
    }
}

fn into_document(carrier: &str, response: PodResponse) -> Result<PodDocument, FetchError> {
    if !response.success {
        let message = response
            .error
            .unwrap_or_else(|| "carrier reported failure without a message".to_string());
        return Err(FetchError::carrier(carrier, response.error_code, message));
    }

    let document_ref = response
        .pod_url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| FetchError::invalid_response(carrier, "success without pod_url"))?;

    Ok(PodDocument {
        document_ref,
        delivery_person: response.pod_data.recipient_name,
        delivered_at: response
            .pod_data
            .delivery_date
            .as_deref()
            .and_then(parse_carrier_timestamp),
        signature_ref: response.pod_data.signature_url,
    })
}

/// Parses RFC 3339, naive ISO 8601 (taken as UTC), or a bare date.
fn parse_carrier_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn adapter(base: &str) -> HttpCarrierAdapter {
        HttpCarrierAdapter::new("UPS", base, None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_pod_url_appends_segments() {
        let url = adapter("https://api.example.com/v1/").pod_url("1Z 99").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/pod/1Z%2099");

        let url = adapter("http://127.0.0.1:8080").pod_url("ABC").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/pod/ABC");
    }

    #[test]
    fn test_new_rejects_bad_base_url() {
        let err = HttpCarrierAdapter::new("ups", "not a url", None, Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, AdapterBuildError::InvalidBaseUrl { .. }));

        let err = HttpCarrierAdapter::new("ups", "mailto:x@y", None, Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, AdapterBuildError::CannotBeABase { .. }));
    }

    #[test]
    fn test_blank_api_key_ignored() {
        let adapter =
            HttpCarrierAdapter::new("ups", "http://x", Some("  ".into()), Duration::from_secs(5))
                .unwrap();
        assert!(adapter.api_key.is_none());
        assert_eq!(adapter.carrier(), "ups");
    }

    #[test]
    fn test_into_document_maps_failure_and_success() {
        let failure = PodResponse {
            success: false,
            pod_url: None,
            pod_data: PodData::default(),
            error: Some("Package not delivered yet".into()),
            error_code: Some("ND".into()),
        };
        let err = into_document("ups", failure).unwrap_err();
        assert!(matches!(err, FetchError::Carrier { ref code, .. } if code.as_deref() == Some("ND")));

        let missing_url = PodResponse {
            success: true,
            pod_url: None,
            pod_data: PodData::default(),
            error: None,
            error_code: None,
        };
        assert!(matches!(
            into_document("ups", missing_url).unwrap_err(),
            FetchError::InvalidResponse { .. }
        ));

        let ok = PodResponse {
            success: true,
            pod_url: Some("https://pod/1.pdf".into()),
            pod_data: PodData {
                delivery_date: Some("2026-03-01T10:15:00".into()),
                recipient_name: Some("J. Martin".into()),
                signature_url: Some("https://pod/1.sig".into()),
            },
            error: None,
            error_code: None,
        };
        let document = into_document("ups", ok).unwrap();
        assert_eq!(document.document_ref, "https://pod/1.pdf");
        assert_eq!(
            document.delivered_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 0).unwrap())
        );
        assert_eq!(document.signature_ref.as_deref(), Some("https://pod/1.sig"));
    }

    #[test]
    fn test_parse_carrier_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 0).unwrap();
        assert_eq!(parse_carrier_timestamp("2026-03-01T10:15:00Z"), Some(expected));
        assert_eq!(parse_carrier_timestamp("2026-03-01T11:15:00+01:00"), Some(expected));
        assert_eq!(parse_carrier_timestamp("2026-03-01T10:15:00.000"), Some(expected));
        assert_eq!(
            parse_carrier_timestamp("2026-03-01"),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_carrier_timestamp("yesterday"), None);
    }
}
