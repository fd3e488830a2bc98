//! Per-carrier rate limiting for POD fetch calls.
//!
//! This module provides [`CarrierRateLimiter`], which tracks a fixed-window
//! request budget per carrier. Unlike a delay-based limiter it never waits:
//! [`CarrierRateLimiter::try_acquire`] grants or denies immediately, and a
//! denied claim is simply deferred to a later cycle.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use podfetch_core::clock::SystemClock;
//! use podfetch_core::fetch::{CarrierRateLimiter, RateLimit};
//!
//! # async fn example() {
//! let limiter = CarrierRateLimiter::new(Arc::new(SystemClock));
//! limiter.set_limit("chronopost", RateLimit::per_minute(60));
//!
//! if limiter.try_acquire("chronopost").await {
//!     // ... call the carrier
//! }
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::clock::Clock;

/// Request limit for one carrier: `limit` calls per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: u32,
    pub window_secs: u64,
}

impl RateLimit {
    #[must_use]
    pub fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window_secs: 60,
        }
    }

    #[must_use]
    pub fn per_hour(limit: u32) -> Self {
        Self {
            limit,
            window_secs: 3_600,
        }
    }

    #[must_use]
    pub fn per_day(limit: u32) -> Self {
        Self {
            limit,
            window_secs: 86_400,
        }
    }

    fn window(&self) -> Duration {
        i64::try_from(self.window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}

/// Budget state for one carrier. Owned by the limiter.
#[derive(Debug, Clone)]
pub struct RateBudget {
    limit: RateLimit,
    /// `None` until the first call to this carrier.
    window_start: Option<DateTime<Utc>>,
    consumed: u32,
}

impl RateBudget {
    fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            window_start: None,
            consumed: 0,
        }
    }

    /// Resets the counter if `now` has crossed the window boundary.
    fn roll(&mut self, now: DateTime<Utc>) {
        let expired = match self.window_start {
            Some(start) => start
                .checked_add_signed(self.limit.window())
                .is_some_and(|end| now >= end),
            None => true,
        };
        if expired {
            self.window_start = Some(now);
            self.consumed = 0;
        }
    }

    fn try_consume(&mut self, now: DateTime<Utc>) -> bool {
        self.roll(now);
        if self.consumed < self.limit.limit {
            self.consumed += 1;
            true
        } else {
            false
        }
    }
}

/// Snapshot of one carrier's budget, for the cycle summary.
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierUsage {
    pub carrier: String,
    pub consumed: u32,
    pub limit: u32,
    pub window_secs: u64,
    /// Calls denied since the limiter was created.
    pub denied: u64,
    pub percent_used: f64,
}

#[derive(Debug)]
struct CarrierState {
    budget: Mutex<RateBudget>,
    denied: AtomicU64,
}

/// Fixed-window request budgets, one per carrier.
///
/// Designed to be wrapped in `Arc` and shared by the per-carrier tasks of a
/// cycle. `DashMap` holds one entry per carrier, and each budget sits behind
/// its own `tokio::sync::Mutex` so the check-and-increment is atomic.
#[derive(Debug)]
pub struct CarrierRateLimiter {
    clock: Arc<dyn Clock>,
    /// Arc lets us release the `DashMap` shard lock before awaiting the Mutex.
    carriers: DashMap<String, Arc<CarrierState>>,
}

impl CarrierRateLimiter {
    /// Creates a limiter with no budgets configured.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            carriers: DashMap::new(),
        }
    }

    /// Creates a limiter with the given budgets.
    #[must_use]
    pub fn with_limits<I, S>(clock: Arc<dyn Clock>, limits: I) -> Self
    where
        I: IntoIterator<Item = (S, RateLimit)>,
        S: Into<String>,
    {
        let limiter = Self::new(clock);
        for (carrier, limit) in limits {
            limiter.set_limit(carrier, limit);
        }
        limiter
    }

    /// Configures (or replaces) a carrier's budget. Replacing starts a fresh window.
    pub fn set_limit(&self, carrier: impl Into<String>, limit: RateLimit) {
        let carrier = carrier.into().to_ascii_lowercase();
        debug!(carrier = %carrier, limit = limit.limit, window_secs = limit.window_secs, "rate budget configured");
        self.carriers.insert(
            carrier,
            Arc::new(CarrierState {
                budget: Mutex::new(RateBudget::new(limit)),
                denied: AtomicU64::new(0),
            }),
        );
    }

    /// Configured limit for a carrier, if any. Waits for an in-flight
    /// acquire on the same carrier.
    pub async fn limit_for(&self, carrier: &str) -> Option<RateLimit> {
        let state = self.carriers.get(&carrier.to_ascii_lowercase())?.clone();
        let budget = state.budget.lock().await;
        Some(budget.limit)
    }

    /// Tries to spend one request of `carrier`'s budget.
    ///
    /// Returns `false` when the current window is exhausted; the caller must
    /// not count the call as an attempt. Carriers without a configured budget
    /// are always admitted.
    #[instrument(skip(self))]
    pub async fn try_acquire(&self, carrier: &str) -> bool {
        let key = carrier.to_ascii_lowercase();
        let Some(state) = self.carriers.get(&key).map(|entry| Arc::clone(entry.value())) else {
            debug!(carrier = %key, "no rate budget configured - admitting");
            return true;
        };

        let now = self.clock.now();
        let mut budget = state.budget.lock().await;
        if budget.try_consume(now) {
            true
        } else {
            let denied = state.denied.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(
                carrier = %key,
                consumed = budget.consumed,
                limit = budget.limit.limit,
                denied,
                "rate budget exhausted"
            );
            false
        }
    }

    /// Opens a window at the current time with `consumed` calls already spent.
    ///
    /// Used at start-up so a one-shot process counts calls logged by earlier
    /// runs inside the same window. No-op for carriers without a budget.
    pub async fn seed_consumed(&self, carrier: &str, consumed: u32) {
        let key = carrier.to_ascii_lowercase();
        let Some(state) = self.carriers.get(&key).map(|entry| Arc::clone(entry.value())) else {
            return;
        };
        let now = self.clock.now();
        let mut budget = state.budget.lock().await;
        budget.window_start = Some(now);
        budget.consumed = consumed.min(budget.limit.limit);
        debug!(carrier = %key, consumed = budget.consumed, "rate budget seeded");
    }

    /// Per-carrier usage in the current window, sorted by carrier.
    pub async fn usage(&self) -> Vec<CarrierUsage> {
        let states: Vec<(String, Arc<CarrierState>)> = self
            .carriers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let now = self.clock.now();
        let mut usage = Vec::with_capacity(states.len());
        for (carrier, state) in states {
            let mut budget = state.budget.lock().await;
            budget.roll(now);
            let percent_used = if budget.limit.limit == 0 {
                100.0
            } else {
                f64::from(budget.consumed) * 100.0 / f64::from(budget.limit.limit)
            };
            usage.push(CarrierUsage {
                carrier,
                consumed: budget.consumed,
                limit: budget.limit.limit,
                window_secs: budget.limit.window_secs,
                denied: state.denied.load(Ordering::SeqCst),
                percent_used,
            });
        }
        usage.sort_by(|a, b| a.carrier.cmp(&b.carrier));
        usage
    }
}
