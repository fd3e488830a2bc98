//! Retry scheduler: one cycle of POD acquisition.
//!
//! Each cycle:
//! 1. Selects eligible claims (pending, or failed with backoff elapsed).
//! 2. Groups them by carrier. Carriers run concurrently; the claims of one
//!    carrier run one after another.
//! 3. For each claim, reuses a POD another claim retrieved for the same
//!    shipment within `pod_cache_days`, without a carrier call. Otherwise asks
//!    the rate limiter for admission. A denied claim is left untouched and
//!    stays eligible.
//! 4. Makes one fetch, classifies a failure, and persists the outcome and the
//!    next backoff timer in a single guarded update.
//! 5. Re-scores and notifies on success; notifies on terminal failure.
//!    Notifications run as separate tasks so a slow receiver never holds up
//!    a carrier's remaining claims; the cycle waits for them before reporting.
//!
//! No per-claim failure aborts the batch. Only a failure to select the batch
//! is returned as an error.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, instrument, warn};

use super::client::PodFetchClient;
use super::rate_limiter::{CarrierRateLimiter, CarrierUsage};
use super::retry::{
    BackoffSchedule, DEFAULT_MAX_RETRIES, ErrorSeverity, RetryDecision, RetryPolicy,
    classify_error,
};
use crate::carrier::CarrierRegistry;
use crate::claims::{
    AttemptError, CachedPod, Claim, ClaimRepository, ClaimStoreError, ClaimTransition,
    OutcomeRecord,
};
use crate::clock::Clock;
use crate::notify::Notifier;
use crate::scoring::ScoringService;

/// Minimum allowed batch size.
pub const MIN_BATCH_SIZE: u32 = 1;

/// Maximum allowed batch size.
pub const MAX_BATCH_SIZE: u32 = 500;

/// Default batch size.
pub const DEFAULT_BATCH_SIZE: u32 = 30;

/// Maximum allowed `max_retries`.
pub const MAX_MAX_RETRIES: u32 = 10;

/// Days a retrieved POD may be reused for another claim on the same shipment.
pub const DEFAULT_POD_CACHE_DAYS: u32 = 30;

/// Maximum allowed `pod_cache_days`.
pub const MAX_POD_CACHE_DAYS: u32 = 365;

/// Error type for scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Invalid batch size.
    #[error("invalid batch size {value}: must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}")]
    InvalidBatchSize { value: u32 },

    /// Invalid retry limit.
    #[error("invalid max retries {value}: must be between 1 and {MAX_MAX_RETRIES}")]
    InvalidMaxRetries { value: u32 },

    /// Invalid POD cache age.
    #[error("invalid pod cache days {value}: must be between 0 and {MAX_POD_CACHE_DAYS}")]
    InvalidPodCacheDays { value: u32 },

    /// The eligible batch could not be selected.
    #[error("failed to select eligible claims: {0}")]
    Select(#[from] ClaimStoreError),
}

/// Per-cycle limits.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub batch_size: u32,
    pub max_retries: u32,
    /// Used for carriers without a backoff override.
    pub default_backoff: BackoffSchedule,
    /// Maximum age of a reusable POD. 0 disables reuse.
    pub pod_cache_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            default_backoff: BackoffSchedule::default(),
            pod_cache_days: DEFAULT_POD_CACHE_DAYS,
        }
    }
}

impl SchedulerConfig {
    /// Checks ranges.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidBatchSize`],
    /// [`SchedulerError::InvalidMaxRetries`] or
    /// [`SchedulerError::InvalidPodCacheDays`].
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(SchedulerError::InvalidBatchSize {
                value: self.batch_size,
            });
        }
        if !(1..=MAX_MAX_RETRIES).contains(&self.max_retries) {
            return Err(SchedulerError::InvalidMaxRetries {
                value: self.max_retries,
            });
        }
        if self.pod_cache_days > MAX_POD_CACHE_DAYS {
            return Err(SchedulerError::InvalidPodCacheDays {
                value: self.pod_cache_days,
            });
        }
        Ok(())
    }

    /// Maximum age of a reusable POD, `None` when reuse is off.
    #[must_use]
    pub fn pod_cache_ttl(&self) -> Option<chrono::Duration> {
        if self.pod_cache_days == 0 {
            return None;
        }
        chrono::Duration::try_days(i64::from(self.pod_cache_days))
    }
}

/// Counters updated by the per-carrier tasks of one cycle.
#[derive(Debug, Default)]
struct CycleStats {
    processed: AtomicUsize,
    succeeded: AtomicUsize,
    failed_temporary: AtomicUsize,
    finalized: AtomicUsize,
    persistent: AtomicUsize,
    unclassified: AtomicUsize,
    needs_audit: AtomicUsize,
    skipped_rate_limited: AtomicUsize,
    record_errors: AtomicUsize,
    cache_hits: AtomicUsize,
    notification_failures: AtomicUsize,
    /// Spawned notifications; each yields whether delivery succeeded.
    notifications: Mutex<Vec<JoinHandle<bool>>>,
}

impl CycleStats {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Summary of one scheduler cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Claims returned by selection.
    pub selected: usize,
    /// Claims admitted and attempted.
    pub processed: usize,
    pub succeeded: usize,
    /// Temporary failures left in `failed` for a later cycle.
    pub failed_temporary: usize,
    /// Claims moved to `failed_final`.
    pub finalized: usize,
    /// Of `finalized`, those ended by a persistent error.
    pub persistent: usize,
    /// Attempts whose error matched no taxonomy entry.
    pub unclassified: usize,
    /// Of `finalized`, those flagged for audit.
    pub needs_audit: usize,
    pub skipped_rate_limited: usize,
    /// Outcomes that could not be persisted.
    pub record_errors: usize,
    /// Of `succeeded`, claims completed with a reused POD and no carrier call.
    pub cache_hits: usize,
    pub notification_failures: usize,
    /// The cycle stopped early on an interrupt.
    pub interrupted: bool,
    pub duration: Duration,
    pub carrier_usage: Vec<CarrierUsage>,
}

impl CycleReport {
    /// True when claims were attempted and none succeeded.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.processed > 0 && self.succeeded == 0
    }
}

/// Outcome of a watch loop.
#[derive(Debug, Clone, Default)]
pub struct WatchSummary {
    pub cycles: usize,
    pub failed_cycles: usize,
    pub last: Option<CycleReport>,
}

/// Drives POD acquisition cycles.
pub struct RetryScheduler {
    repository: Arc<dyn ClaimRepository>,
    registry: Arc<CarrierRegistry>,
    client: PodFetchClient,
    rate_limiter: Arc<CarrierRateLimiter>,
    scoring: ScoringService,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    interrupted: Arc<AtomicBool>,
}

impl std::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl RetryScheduler {
    /// Creates a scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] when `config` is out of range.
    #[allow(clippy::too_many_arguments)]
    #[instrument(level = "debug", skip_all, fields(batch_size = config.batch_size, max_retries = config.max_retries))]
    pub fn new(
        repository: Arc<dyn ClaimRepository>,
        registry: Arc<CarrierRegistry>,
        client: PodFetchClient,
        rate_limiter: Arc<CarrierRateLimiter>,
        scoring: ScoringService,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        debug!(
            carriers = registry.carriers().count(),
            attempt_timeout_secs = client.attempt_timeout().as_secs(),
            "creating retry scheduler"
        );
        Ok(Self {
            repository,
            registry,
            client,
            rate_limiter,
            scoring,
            notifier,
            clock,
            config,
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Uses `flag` to stop new attempts. In-flight attempts still finish.
    #[must_use]
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Runs one cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Select`] if the batch cannot be selected.
    /// Per-claim failures are counted in the report instead.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleReport, SchedulerError> {
        let started = Instant::now();
        let now = self.clock.now();
        let claims = self
            .repository
            .select_eligible(now, self.config.max_retries, self.config.batch_size)
            .await?;
        let selected = claims.len();

        let mut by_carrier: BTreeMap<String, Vec<Claim>> = BTreeMap::new();
        for claim in claims {
            by_carrier
                .entry(claim.carrier.to_ascii_lowercase())
                .or_default()
                .push(claim);
        }
        debug!(selected, carriers = by_carrier.len(), "starting cycle");

        let stats = CycleStats::default();
        join_all(
            by_carrier
                .iter()
                .map(|(carrier, claims)| self.process_carrier(carrier, claims, &stats)),
        )
        .await;

        let notifications = std::mem::take(&mut *stats.notifications.lock().await);
        for delivered in join_all(notifications).await {
            if !matches!(delivered, Ok(true)) {
                CycleStats::bump(&stats.notification_failures);
            }
        }

        let report = CycleReport {
            selected,
            processed: CycleStats::get(&stats.processed),
            succeeded: CycleStats::get(&stats.succeeded),
            failed_temporary: CycleStats::get(&stats.failed_temporary),
            finalized: CycleStats::get(&stats.finalized),
            persistent: CycleStats::get(&stats.persistent),
            unclassified: CycleStats::get(&stats.unclassified),
            needs_audit: CycleStats::get(&stats.needs_audit),
            skipped_rate_limited: CycleStats::get(&stats.skipped_rate_limited),
            record_errors: CycleStats::get(&stats.record_errors),
            cache_hits: CycleStats::get(&stats.cache_hits),
            notification_failures: CycleStats::get(&stats.notification_failures),
            interrupted: self.is_interrupted(),
            duration: started.elapsed(),
            carrier_usage: self.rate_limiter.usage().await,
        };
        log_summary(&report);
        Ok(report)
    }

    /// Runs cycles every `interval` until the interrupt flag is set.
    ///
    /// A cycle that fails to select its batch is logged and the loop goes on.
    pub async fn run_until_interrupted(&self, interval: Duration) -> WatchSummary {
        const POLL: Duration = Duration::from_millis(200);
        let mut summary = WatchSummary::default();
        while !self.is_interrupted() {
            match self.run_cycle().await {
                Ok(report) => {
                    summary.cycles += 1;
                    summary.last = Some(report);
                }
                Err(e) => {
                    summary.failed_cycles += 1;
                    error!(error = %e, "cycle failed");
                }
            }

            let mut waited = Duration::ZERO;
            while waited < interval && !self.is_interrupted() {
                let step = POLL.min(interval - waited);
                tokio::time::sleep(step).await;
                waited += step;
            }
        }
        info!(
            cycles = summary.cycles,
            failed_cycles = summary.failed_cycles,
            "watch stopped"
        );
        summary
    }

    async fn process_carrier(&self, carrier: &str, claims: &[Claim], stats: &CycleStats) {
        let policy = RetryPolicy::new(
            self.config.max_retries,
            self.registry
                .backoff_for(carrier)
                .cloned()
                .unwrap_or_else(|| self.config.default_backoff.clone()),
        );

        for claim in claims {
            if self.is_interrupted() {
                debug!(carrier, "interrupted - leaving remaining claims untouched");
                return;
            }
            self.process_claim(claim, &policy, stats).await;
        }
    }

    #[instrument(skip(self, claim, policy, stats), fields(claim_ref = %claim.claim_reference, carrier = %claim.carrier, attempt = claim.pod_retry_count + 1))]
    async fn process_claim(&self, claim: &Claim, policy: &RetryPolicy, stats: &CycleStats) {
        let status = claim.pod_status();
        if !status.is_schedulable() {
            warn!(status = %status, "selected claim is not schedulable - skipping");
            return;
        }

        if let Some(cached) = self.cached_pod(claim).await {
            self.complete_from_cache(claim, &cached, stats).await;
            return;
        }

        if !self.rate_limiter.try_acquire(&claim.carrier).await {
            CycleStats::bump(&stats.skipped_rate_limited);
            debug!("rate budget exhausted - deferring claim");
            return;
        }

        CycleStats::bump(&stats.processed);
        let attempted_at = self.clock.now();
        let result = self.client.fetch(claim).await;
        let latency_ms = result.latency_ms();
        let attempt_number =
            u32::try_from(claim.pod_retry_count.saturating_add(1)).unwrap_or(u32::MAX);

        match &result.outcome {
            Ok(document) => {
                let record = outcome_record(
                    claim,
                    attempted_at,
                    latency_ms,
                    ClaimTransition::Retrieved(document),
                );
                if !self.persist(&record, stats).await {
                    return;
                }
                CycleStats::bump(&stats.succeeded);
                info!(document_ref = %document.document_ref, latency_ms, "POD retrieved");

                if let Err(e) = self.scoring.rescore(claim.id).await {
                    warn!(error = %e, "failed to re-score claim");
                }
                self.notify(
                    Notification::PodRetrieved {
                        claim_ref: claim.claim_reference.clone(),
                        document_ref: document.document_ref.clone(),
                    },
                    stats,
                )
                .await;
            }
            Err(fetch_error) => {
                let classification = classify_error(fetch_error);
                let message = fetch_error.to_string();
                let code = fetch_error.code();
                if classification.unclassified {
                    CycleStats::bump(&stats.unclassified);
                    warn!(error = %message, unclassified = true, "unclassified fetch error");
                } else {
                    match classification.severity() {
                        ErrorSeverity::Critical | ErrorSeverity::Warning => {
                            warn!(error = %message, class = %classification.class, "fetch failed");
                        }
                        ErrorSeverity::Info => {
                            info!(error = %message, class = %classification.class, "fetch failed");
                        }
                    }
                }

                let error = AttemptError {
                    code: code.as_deref(),
                    message: &message,
                    unclassified: classification.unclassified,
                };
                match policy.decide(classification, attempt_number, attempted_at) {
                    RetryDecision::RetryAt(next_eligible_at) => {
                        let transition = ClaimTransition::RetryLater {
                            error,
                            next_eligible_at,
                        };
                        let record = outcome_record(claim, attempted_at, latency_ms, transition);
                        if self.persist(&record, stats).await {
                            CycleStats::bump(&stats.failed_temporary);
                            debug!(next_eligible_at = %next_eligible_at, "claim deferred");
                        }
                    }
                    RetryDecision::Finalize {
                        persistent,
                        needs_audit,
                    } => {
                        let transition = ClaimTransition::Finalized {
                            error,
                            persistent,
                            needs_audit,
                        };
                        let record = outcome_record(claim, attempted_at, latency_ms, transition);
                        if !self.persist(&record, stats).await {
                            return;
                        }
                        CycleStats::bump(&stats.finalized);
                        if persistent {
                            CycleStats::bump(&stats.persistent);
                        }
                        if needs_audit {
                            CycleStats::bump(&stats.needs_audit);
                        }
                        warn!(persistent, needs_audit, "claim finalized");

                        self.notify(
                            Notification::FinalFailure {
                                claim_ref: claim.claim_reference.clone(),
                                reason: message.clone(),
                            },
                            stats,
                        )
                        .await;
                    }
                }
            }
        }
    }

    /// A POD retrieved for the same shipment within the cache window.
    ///
    /// A lookup error is logged and treated as a miss.
    async fn cached_pod(&self, claim: &Claim) -> Option<CachedPod> {
        let ttl = self.config.pod_cache_ttl()?;
        let tracking = claim.tracking()?;
        let since = self.clock.now().checked_sub_signed(ttl)?;
        match self
            .repository
            .find_cached_pod(&claim.carrier, tracking, since)
            .await
        {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "POD cache lookup failed - fetching from carrier");
                None
            }
        }
    }

    async fn complete_from_cache(&self, claim: &Claim, cached: &CachedPod, stats: &CycleStats) {
        if let Err(e) = self.repository.apply_cached_pod(claim, cached).await {
            CycleStats::bump(&stats.record_errors);
            warn!(error = %e, "failed to apply cached POD");
            return;
        }
        CycleStats::bump(&stats.succeeded);
        CycleStats::bump(&stats.cache_hits);
        info!(
            document_ref = %cached.document.document_ref,
            source_claim_id = cached.source_claim_id,
            "POD reused from an earlier retrieval"
        );

        if let Err(e) = self.scoring.rescore(claim.id).await {
            warn!(error = %e, "failed to re-score claim");
        }
        self.notify(
            Notification::PodRetrieved {
                claim_ref: claim.claim_reference.clone(),
                document_ref: cached.document.document_ref.clone(),
            },
            stats,
        )
        .await;
    }

    /// Sends a notification on its own task. Failures are counted once the
    /// cycle collects the task.
    async fn notify(&self, notification: Notification, stats: &CycleStats) {
        let notifier = Arc::clone(&self.notifier);
        let task = async move {
            let result = match &notification {
                Notification::PodRetrieved {
                    claim_ref,
                    document_ref,
                } => notifier.notify_pod_retrieved(claim_ref, document_ref).await,
                Notification::FinalFailure { claim_ref, reason } => {
                    notifier.notify_final_failure(claim_ref, reason).await
                }
            };
            if let Err(e) = &result {
                warn!(error = %e, "notification failed");
            }
            result.is_ok()
        };
        let handle = tokio::spawn(task.instrument(tracing::Span::current()));
        stats.notifications.lock().await.push(handle);
    }

    /// Writes an outcome. Returns false (and counts it) when it could not be applied.
    async fn persist(&self, record: &OutcomeRecord<'_>, stats: &CycleStats) -> bool {
        match self.repository.record_outcome(record).await {
            Ok(()) => true,
            Err(e) => {
                CycleStats::bump(&stats.record_errors);
                if e.is_busy_or_locked() {
                    warn!(
                        claim_id = record.claim_id,
                        error = %e,
                        "database busy; outcome not recorded, claim stays eligible"
                    );
                } else {
                    error!(claim_id = record.claim_id, error = %e, "failed to record outcome");
                }
                false
            }
        }
    }
}

enum Notification {
    PodRetrieved {
        claim_ref: String,
        document_ref: String,
    },
    FinalFailure {
        claim_ref: String,
        reason: String,
    },
}

fn outcome_record<'a>(
    claim: &'a Claim,
    attempted_at: DateTime<Utc>,
    latency_ms: i64,
    transition: ClaimTransition<'a>,
) -> OutcomeRecord<'a> {
    OutcomeRecord {
        claim_id: claim.id,
        carrier: &claim.carrier,
        selected_status: claim.pod_status(),
        selected_retry_count: claim.pod_retry_count,
        attempted_at,
        latency_ms,
        transition,
    }
}

fn log_summary(report: &CycleReport) {
    info!(
        selected = report.selected,
        processed = report.processed,
        success = report.succeeded,
        cache_hits = report.cache_hits,
        failed = report.failed_temporary + report.finalized,
        finalized = report.finalized,
        persistent = report.persistent,
        unclassified = report.unclassified,
        skipped_rate_limit = report.skipped_rate_limited,
        record_errors = report.record_errors,
        notification_failures = report.notification_failures,
        interrupted = report.interrupted,
        duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
        "cycle complete"
    );
    for usage in &report.carrier_usage {
        info!(
            carrier = %usage.carrier,
            consumed = usage.consumed,
            limit = usage.limit,
            window_secs = usage.window_secs,
            denied = usage.denied,
            percent_used = format!("{:.1}", usage.percent_used),
            "rate budget usage"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(SchedulerConfig::default().validate().is_ok());

        let config = SchedulerConfig {
            batch_size: 0,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidBatchSize { value: 0 })
        ));

        let config = SchedulerConfig {
            batch_size: 501,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SchedulerConfig {
            max_retries: 11,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidMaxRetries { value: 11 })
        ));

        let config = SchedulerConfig {
            pod_cache_days: 366,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidPodCacheDays { value: 366 })
        ));
    }

    #[test]
    fn test_pod_cache_ttl() {
        assert_eq!(
            SchedulerConfig::default().pod_cache_ttl(),
            Some(chrono::Duration::days(30))
        );
        let off = SchedulerConfig {
            pod_cache_days: 0,
            ..SchedulerConfig::default()
        };
        assert_eq!(off.pod_cache_ttl(), None);
    }

    #[test]
    fn test_all_failed() {
        let mut report = CycleReport::default();
        assert!(!report.all_failed(), "no work is not a failure");
        report.processed = 2;
        assert!(report.all_failed());
        report.succeeded = 1;
        assert!(!report.all_failed());
    }
}
