//! CLI entry point for podfetch.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use podfetch_core::claims::ClaimRepository;
use podfetch_core::{
    CarrierRateLimiter, CarrierRegistry, ClaimStore, Clock, Config, CycleReport, Database,
    InstanceLock, PodFetchClient, RetryScheduler, Scorer, ScoringService, SystemClock,
};
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command};

/// Process outcome, mapped to the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessExit {
    /// No work, or at least one success.
    Success,
    /// Every processed claim failed.
    AllFailed,
}

impl ProcessExit {
    fn from_report(report: &CycleReport) -> Self {
        if report.all_failed() {
            Self::AllFailed
        } else {
            Self::Success
        }
    }
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::AllFailed => ExitCode::from(2),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    match run(args).await {
        Ok(exit) => exit.into(),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ProcessExit> {
    let loaded = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    let mut config = loaded.config;
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(database) = args.database {
        config.database = database;
    }
    config.validate().context("invalid configuration")?;

    let db = Database::new(&config.database)
        .await
        .with_context(|| format!("failed to open database '{}'", config.database.display()))?;
    let store = ClaimStore::new(db.clone());

    let exit = match args.command {
        Command::Run => {
            let _lock = InstanceLock::acquire(&config.database)?;
            info!(database = %config.database.display(), "podfetch starting");
            let interrupted = Arc::new(AtomicBool::new(false));
            let scheduler = build_scheduler(&config, store, interrupted).await?;
            let report = scheduler.run_cycle().await?;
            print_report(&report);
            ProcessExit::from_report(&report)
        }
        Command::Watch { interval } => {
            let _lock = InstanceLock::acquire(&config.database)?;
            let interval = interval.map_or_else(|| config.interval(), Duration::from_secs);
            info!(
                database = %config.database.display(),
                interval_secs = interval.as_secs(),
                "podfetch watching"
            );

            let interrupted = Arc::new(AtomicBool::new(false));
            let interrupted_signal = Arc::clone(&interrupted);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    interrupted_signal.store(true, Ordering::SeqCst);
                }
            });

            let scheduler = build_scheduler(&config, store, interrupted).await?;
            let summary = scheduler.run_until_interrupted(interval).await;
            if let Some(last) = &summary.last {
                print_report(last);
            }
            ProcessExit::Success
        }
        Command::Request { claim_ref } => {
            let claim = store.get_by_reference(&claim_ref).await?;
            let status = store.request_pod(claim.id).await?;
            println!("{claim_ref}: {status}");
            ProcessExit::Success
        }
        Command::Manual { claim_ref, note } => {
            let claim = store.get_by_reference(&claim_ref).await?;
            store.mark_manual(claim.id, note.as_deref()).await?;
            println!("{claim_ref}: manual");
            ProcessExit::Success
        }
        Command::Retrigger { claim_ref } => {
            let claim = store.get_by_reference(&claim_ref).await?;
            store.retrigger(claim.id).await?;
            println!("{claim_ref}: pending");
            ProcessExit::Success
        }
        Command::Evidence { claim_ref } => {
            let claim = store.get_by_reference(&claim_ref).await?;
            let score = scoring_service(&config, store)?
                .record_damage_evidence(claim.id)
                .await?;
            println!("{claim_ref}: {score:.2}");
            ProcessExit::Success
        }
        Command::Rescore { claim_ref } => {
            let claim = store.get_by_reference(&claim_ref).await?;
            let score = scoring_service(&config, store)?.rescore(claim.id).await?;
            println!("{claim_ref}: {score:.2}");
            ProcessExit::Success
        }
        Command::Status => {
            for (status, count) in store.status_counts().await? {
                println!("{status:<14} {count}");
            }
            ProcessExit::Success
        }
    };

    db.close().await;
    Ok(exit)
}

fn scoring_service(config: &Config, store: ClaimStore) -> Result<ScoringService> {
    let registry = Arc::new(
        config
            .build_registry()
            .context("failed to build carrier adapters")?,
    );
    let repository: Arc<dyn ClaimRepository> = Arc::new(store);
    Ok(ScoringService::new(
        repository,
        registry,
        Scorer::new(config.scoring.clone()),
    ))
}

async fn build_scheduler(
    config: &Config,
    store: ClaimStore,
    interrupted: Arc<AtomicBool>,
) -> Result<RetryScheduler> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry: Arc<CarrierRegistry> = Arc::new(
        config
            .build_registry()
            .context("failed to build carrier adapters")?,
    );

    let rate_limiter = Arc::new(CarrierRateLimiter::with_limits(
        Arc::clone(&clock),
        registry.rate_limits(),
    ));
    seed_rate_budgets(&rate_limiter, &registry, &store, clock.as_ref()).await?;

    let repository: Arc<dyn ClaimRepository> = Arc::new(store);
    let client = PodFetchClient::new(Arc::clone(&registry), config.attempt_timeout());
    let scoring = ScoringService::new(
        Arc::clone(&repository),
        Arc::clone(&registry),
        Scorer::new(config.scoring.clone()),
    );
    let notifier = config.build_notifier()?;

    let scheduler = RetryScheduler::new(
        repository,
        registry,
        client,
        rate_limiter,
        scoring,
        notifier,
        clock,
        config.scheduler_config(),
    )?
    .with_interrupt_flag(interrupted);
    Ok(scheduler)
}

/// Counts calls logged by earlier runs against each carrier's current window.
async fn seed_rate_budgets(
    rate_limiter: &CarrierRateLimiter,
    registry: &CarrierRegistry,
    store: &ClaimStore,
    clock: &dyn Clock,
) -> Result<()> {
    let now = clock.now();
    for (carrier, limit) in registry.rate_limits() {
        let Some(since) = i64::try_from(limit.window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|window| now.checked_sub_signed(window))
        else {
            continue;
        };
        let used = store
            .count_attempts_since(&carrier, since)
            .await
            .with_context(|| format!("failed to read attempt history for {carrier}"))?;
        if used > 0 {
            rate_limiter
                .seed_consumed(&carrier, u32::try_from(used).unwrap_or(u32::MAX))
                .await;
        }
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!(
        "selected {} | processed {} | success {} | retry later {} | final {} | skipped (rate limit) {} | {:.1}s",
        report.selected,
        report.processed,
        report.succeeded,
        report.failed_temporary,
        report.finalized,
        report.skipped_rate_limited,
        report.duration.as_secs_f64()
    );
    if report.cache_hits > 0 {
        info!(cache_hits = report.cache_hits, "PODs reused without a carrier call");
    }
    if report.record_errors > 0 {
        warn!(record_errors = report.record_errors, "some outcomes were not recorded");
    }
    if report.interrupted {
        warn!("Interrupted. Run again to resume.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_outcome_from_report() {
        let mut report = CycleReport::default();
        assert_eq!(ProcessExit::from_report(&report), ProcessExit::Success);

        report.processed = 3;
        assert_eq!(ProcessExit::from_report(&report), ProcessExit::AllFailed);

        report.succeeded = 1;
        assert_eq!(ProcessExit::from_report(&report), ProcessExit::Success);
    }
}
