//! Outbound notifications for terminal claim outcomes.
//!
//! Notifications are fire-and-forget from the scheduler's point of view: a
//! failed notification is logged and counted, and claim state is never rolled
//! back because of it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::user_agent;

const WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Errors from delivering a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("webhook {url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to build webhook client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Receives terminal claim events.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A POD document was recovered.
    async fn notify_pod_retrieved(
        &self,
        claim_ref: &str,
        document_ref: &str,
    ) -> Result<(), NotifyError>;

    /// A claim reached `failed_final`.
    async fn notify_final_failure(&self, claim_ref: &str, reason: &str)
    -> Result<(), NotifyError>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_pod_retrieved(
        &self,
        claim_ref: &str,
        document_ref: &str,
    ) -> Result<(), NotifyError> {
        info!(claim_ref, document_ref, "POD retrieved");
        Ok(())
    }

    async fn notify_final_failure(
        &self,
        claim_ref: &str,
        reason: &str,
    ) -> Result<(), NotifyError> {
        warn!(claim_ref, reason, "POD acquisition failed permanently");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WebhookEvent<'a> {
    PodRetrieved {
        claim_reference: &'a str,
        document_ref: &'a str,
    },
    FinalFailure {
        claim_reference: &'a str,
        reason: &'a str,
    },
}

/// POSTs notifications as JSON to a webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: Client,
}

impl WebhookNotifier {
    /// Creates a notifier for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Client`] when the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .user_agent(user_agent::default_user_agent())
            .build()
            .map_err(NotifyError::Client)?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    async fn post(&self, event: &WebhookEvent<'_>) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|source| NotifyError::Request {
                url: self.url.clone(),
                source,
            })?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self))]
    async fn notify_pod_retrieved(
        &self,
        claim_ref: &str,
        document_ref: &str,
    ) -> Result<(), NotifyError> {
        self.post(&WebhookEvent::PodRetrieved {
            claim_reference: claim_ref,
            document_ref,
        })
        .await
    }

    #[instrument(skip(self))]
    async fn notify_final_failure(
        &self,
        claim_ref: &str,
        reason: &str,
    ) -> Result<(), NotifyError> {
        self.post(&WebhookEvent::FinalFailure {
            claim_reference: claim_ref,
            reason,
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let notifier = LogNotifier;
        assert!(notifier.notify_pod_retrieved("CLM-1", "doc").await.is_ok());
        assert!(notifier.notify_final_failure("CLM-1", "gone").await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_posts_event_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/pod"))
            .and(body_json(serde_json::json!({
                "event": "pod_retrieved",
                "claim_reference": "CLM-1",
                "document_ref": "https://pod/1.pdf"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hooks/pod", server.uri())).unwrap();
        notifier
            .notify_pod_retrieved("CLM-1", "https://pod/1.pdf")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri()).unwrap();
        let err = notifier
            .notify_final_failure("CLM-1", "invalid tracking")
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 500, .. }));
    }
}
