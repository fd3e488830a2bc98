//! Carrier registry: adapters plus capability profiles keyed by carrier id.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{CarrierAdapter, CarrierProfile};
use crate::fetch::{BackoffSchedule, RateLimit};

/// Adapters and profiles for every known carrier.
#[derive(Default)]
pub struct CarrierRegistry {
    adapters: BTreeMap<String, Arc<dyn CarrierAdapter>>,
    profiles: BTreeMap<String, CarrierProfile>,
}

impl fmt::Debug for CarrierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarrierRegistry")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .field("profiles", &self.profiles)
            .finish()
    }
}

impl CarrierRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a profile and its adapter, replacing any previous entry.
    pub fn register(&mut self, profile: CarrierProfile, adapter: Arc<dyn CarrierAdapter>) {
        debug!(carrier = %profile.id, adapter = adapter.carrier(), "registering carrier");
        self.adapters.insert(profile.id.clone(), adapter);
        self.profiles.insert(profile.id.clone(), profile);
    }

    /// Registers a profile with no adapter. Claims for this carrier fail as unsupported.
    pub fn register_profile(&mut self, profile: CarrierProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    /// Adapter for a carrier, if one is registered.
    #[must_use]
    pub fn adapter(&self, carrier: &str) -> Option<Arc<dyn CarrierAdapter>> {
        self.adapters.get(&carrier.to_ascii_lowercase()).cloned()
    }

    #[must_use]
    pub fn profile(&self, carrier: &str) -> Option<&CarrierProfile> {
        self.profiles.get(&carrier.to_ascii_lowercase())
    }

    /// Ids of carriers with an adapter.
    pub fn carriers(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    /// Configured rate limits, for seeding the rate limiter.
    pub fn rate_limits(&self) -> impl Iterator<Item = (String, RateLimit)> + '_ {
        self.profiles
            .values()
            .filter_map(|profile| profile.rate_limit.map(|limit| (profile.id.clone(), limit)))
    }

    /// The carrier's backoff override, if any.
    #[must_use]
    pub fn backoff_for(&self, carrier: &str) -> Option<&BackoffSchedule> {
        self.profile(carrier).and_then(|profile| profile.backoff.as_ref())
    }

    /// The carrier's score baseline override, if any.
    #[must_use]
    pub fn baseline_for(&self, carrier: &str) -> Option<f64> {
        self.profile(carrier).and_then(|profile| profile.baseline_score)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::carrier::PodDocument;
    use crate::fetch::FetchError;

    struct StubAdapter(&'static str);

    #[async_trait]
    impl CarrierAdapter for StubAdapter {
        fn carrier(&self) -> &str {
            self.0
        }

        async fn fetch_pod(&self, tracking_ref: &str) -> Result<PodDocument, FetchError> {
            Ok(PodDocument {
                document_ref: format!("{}/{tracking_ref}", self.0),
                ..PodDocument::default()
            })
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup_case_insensitive() {
        let mut registry = CarrierRegistry::new();
        registry.register(
            CarrierProfile::new("ups").with_rate_limit(RateLimit::per_minute(30)),
            Arc::new(StubAdapter("ups")),
        );

        let adapter = registry.adapter("UPS").unwrap();
        let document = adapter.fetch_pod("1Z1").await.unwrap();
        assert_eq!(document.document_ref, "ups/1Z1");
        assert!(registry.adapter("dhl").is_none());
        assert_eq!(registry.carriers().collect::<Vec<_>>(), vec!["ups"]);
    }

    #[test]
    fn test_rate_limits_and_overrides() {
        let mut registry = CarrierRegistry::new();
        registry.register_profile(
            CarrierProfile::new("dhl")
                .with_rate_limit(RateLimit::per_day(2500))
                .with_backoff(BackoffSchedule::from_hours(&[2]))
                .with_baseline_score(0.4),
        );
        registry.register_profile(CarrierProfile::new("gls"));

        let limits: Vec<_> = registry.rate_limits().collect();
        assert_eq!(limits, vec![("dhl".to_string(), RateLimit::per_day(2500))]);
        assert_eq!(
            registry.backoff_for("dhl"),
            Some(&BackoffSchedule::from_hours(&[2]))
        );
        assert_eq!(registry.baseline_for("dhl"), Some(0.4));
        assert_eq!(registry.baseline_for("gls"), None);
        assert!(registry.adapter("dhl").is_none());
    }
}
