//! Shared fixtures for integration tests: a temp-file database, a scripted
//! carrier adapter, a recording notifier, and a scheduler wired to a manual
//! clock.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use podfetch_core::claims::{ClaimRepository, NewClaim};
use podfetch_core::fetch::{CarrierRateLimiter, FetchError, PodFetchClient, RateLimit};
use podfetch_core::notify::{Notifier, NotifyError};
use podfetch_core::{
    CarrierAdapter, CarrierProfile, CarrierRegistry, Claim, ClaimStore, Clock, Database,
    ManualClock, PodDocument, RetryScheduler, SchedulerConfig, Scorer, ScoringService,
    ScoringWeights,
};
use tempfile::TempDir;
use tokio::sync::watch;

/// 2026-03-01 12:00 UTC.
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn document(reference: &str) -> PodDocument {
    PodDocument {
        document_ref: reference.to_string(),
        delivery_person: Some("J. Martin".to_string()),
        delivered_at: Some(start()),
        signature_ref: Some(format!("{reference}/signature.png")),
    }
}

/// Adapter that replays a fixed list of results, then fails with a
/// connection error.
#[derive(Debug)]
pub struct ScriptedAdapter {
    carrier: String,
    script: Mutex<VecDeque<Result<PodDocument, FetchError>>>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(
        carrier: &str,
        script: impl IntoIterator<Item = Result<PodDocument, FetchError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            carrier: carrier.to_string(),
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn push(&self, result: Result<PodDocument, FetchError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CarrierAdapter for ScriptedAdapter {
    fn carrier(&self) -> &str {
        &self.carrier
    }

    async fn fetch_pod(&self, _tracking_ref: &str) -> Result<PodDocument, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(FetchError::connection(&self.carrier, "script exhausted")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Retrieved { claim_ref: String, document_ref: String },
    FinalFailure { claim_ref: String, reason: String },
}

/// Notifier that records every event; optionally fails each call or holds
/// every call until released.
#[derive(Debug)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
    fail: AtomicBool,
    held: watch::Sender<bool>,
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self {
            events: Mutex::default(),
            fail: AtomicBool::new(false),
            held: watch::channel(false).0,
        }
    }
}

impl RecordingNotifier {
    /// Makes every later call wait until [`Self::release`].
    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    pub fn release(&self) {
        self.held.send_replace(false);
    }

    async fn wait_until_released(&self) {
        let mut held = self.held.subscribe();
        let _ = held.wait_for(|held| !*held).await;
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn record(&self, event: Event) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event);
        if self.fail.load(Ordering::SeqCst) {
            Err(NotifyError::Status {
                url: "http://notifier.invalid".to_string(),
                status: 503,
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_pod_retrieved(
        &self,
        claim_ref: &str,
        document_ref: &str,
    ) -> Result<(), NotifyError> {
        self.wait_until_released().await;
        self.record(Event::Retrieved {
            claim_ref: claim_ref.to_string(),
            document_ref: document_ref.to_string(),
        })
    }

    async fn notify_final_failure(&self, claim_ref: &str, reason: &str) -> Result<(), NotifyError> {
        self.wait_until_released().await;
        self.record(Event::FinalFailure {
            claim_ref: claim_ref.to_string(),
            reason: reason.to_string(),
        })
    }
}

/// Database, store, clock, and collaborators for scheduler tests.
pub struct Harness {
    pub store: ClaimStore,
    pub clock: Arc<ManualClock>,
    pub registry: Arc<CarrierRegistry>,
    pub rate_limiter: Arc<CarrierRateLimiter>,
    pub notifier: Arc<RecordingNotifier>,
    pub interrupted: Arc<AtomicBool>,
    _temp_dir: TempDir,
}

impl Harness {
    pub async fn new(registry: CarrierRegistry) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("claims.db"))
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let store = ClaimStore::with_clock(db, Arc::clone(&dyn_clock));
        let registry = Arc::new(registry);
        let rate_limiter = Arc::new(CarrierRateLimiter::with_limits(
            dyn_clock,
            registry.rate_limits(),
        ));

        Self {
            store,
            clock,
            registry,
            rate_limiter,
            notifier: Arc::new(RecordingNotifier::default()),
            interrupted: Arc::new(AtomicBool::new(false)),
            _temp_dir: temp_dir,
        }
    }

    /// Registry with one scripted adapter per carrier, all unlimited.
    pub async fn with_adapters(adapters: &[Arc<ScriptedAdapter>]) -> Self {
        Self::new(registry_with(adapters, &[])).await
    }

    pub fn scoring(&self) -> ScoringService {
        let repository: Arc<dyn ClaimRepository> = Arc::new(self.store.clone());
        ScoringService::new(
            repository,
            Arc::clone(&self.registry),
            Scorer::new(ScoringWeights::default()),
        )
    }

    pub fn scheduler(&self, max_retries: u32) -> RetryScheduler {
        self.scheduler_with(SchedulerConfig {
            max_retries,
            ..SchedulerConfig::default()
        })
    }

    pub fn scheduler_with(&self, config: SchedulerConfig) -> RetryScheduler {
        let repository: Arc<dyn ClaimRepository> = Arc::new(self.store.clone());
        let clock: Arc<dyn Clock> = self.clock.clone();
        let notifier: Arc<dyn Notifier> = self.notifier.clone();
        RetryScheduler::new(
            repository,
            Arc::clone(&self.registry),
            PodFetchClient::new(Arc::clone(&self.registry), Duration::from_secs(5)),
            Arc::clone(&self.rate_limiter),
            self.scoring(),
            notifier,
            clock,
            config,
        )
        .unwrap()
        .with_interrupt_flag(Arc::clone(&self.interrupted))
    }

    /// Creates a claim and requests its POD.
    pub async fn requested_claim(&self, reference: &str, carrier: &str, tracking: &str) -> i64 {
        let id = self
            .store
            .create_claim(&NewClaim {
                claim_reference: reference.to_string(),
                carrier: carrier.to_string(),
                tracking_number: Some(tracking.to_string()),
                dispute_type: "lost".to_string(),
                ..NewClaim::default()
            })
            .await
            .unwrap();
        self.store.request_pod(id).await.unwrap();
        id
    }

    pub async fn claim(&self, id: i64) -> Claim {
        self.store.get(id).await.unwrap().unwrap()
    }
}

/// Registry with the given adapters and optional per-carrier limits.
pub fn registry_with(
    adapters: &[Arc<ScriptedAdapter>],
    limits: &[(&str, RateLimit)],
) -> CarrierRegistry {
    let mut registry = CarrierRegistry::new();
    for adapter in adapters {
        let mut profile = CarrierProfile::new(adapter.carrier());
        if let Some((_, limit)) = limits.iter().find(|(id, _)| *id == adapter.carrier()) {
            profile = profile.with_rate_limit(*limit);
        }
        registry.register(profile, Arc::clone(adapter) as Arc<dyn CarrierAdapter>);
    }
    registry
}
