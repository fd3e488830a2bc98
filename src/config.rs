//! Engine configuration loaded from TOML.
//!
//! Lookup order for the config file:
//! 1. an explicit `--config <path>` (must exist)
//! 2. `$XDG_CONFIG_HOME/podfetch/config.toml`
//! 3. `$HOME/.config/podfetch/config.toml`
//!
//! With no file, built-in defaults apply. Carrier tables merge field by field
//! over the built-in carrier defaults, so `[carriers.ups]` with only a
//! `base_url` keeps the default UPS rate limit.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::carrier::{AdapterBuildError, CarrierProfile, CarrierRegistry, HttpCarrierAdapter};
use crate::fetch::{
    BackoffSchedule, DEFAULT_BACKOFF_HOURS, DEFAULT_BATCH_SIZE, DEFAULT_MAX_RETRIES,
    DEFAULT_POD_CACHE_DAYS, RateLimit, SchedulerConfig, SchedulerError,
};
use crate::notify::{LogNotifier, Notifier, NotifyError, WebhookNotifier};
use crate::scoring::ScoringWeights;

const DEFAULT_DATABASE: &str = "podfetch.db";
const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_INTERVAL_SECS: u64 = 3_600;

/// Errors loading or applying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for `{field}`: {message}")]
    Invalid { field: String, message: String },

    #[error(transparent)]
    Adapter(#[from] AdapterBuildError),

    #[error(transparent)]
    Notifier(#[from] NotifyError),
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        message: message.into(),
    }
}

/// Where notifications go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotifierConfig {
    #[default]
    Log,
    Webhook { url: String },
}

/// Per-carrier settings. Unset fields fall back to the built-in entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CarrierConfig {
    pub display_name: Option<String>,
    /// Root of the carrier's POD API. No URL means no adapter.
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
    pub rate_limit: Option<RateLimit>,
    pub backoff_hours: Option<Vec<u64>>,
    pub baseline_score: Option<f64>,
}

impl CarrierConfig {
    fn with_limit(display_name: &str, limit: RateLimit) -> Self {
        Self {
            display_name: Some(display_name.to_string()),
            rate_limit: Some(limit),
            ..Self::default()
        }
    }

    fn fill_from(&mut self, fallback: &Self) {
        if self.display_name.is_none() {
            self.display_name.clone_from(&fallback.display_name);
        }
        if self.base_url.is_none() {
            self.base_url.clone_from(&fallback.base_url);
        }
        if self.api_key_env.is_none() {
            self.api_key_env.clone_from(&fallback.api_key_env);
        }
        if self.rate_limit.is_none() {
            self.rate_limit = fallback.rate_limit;
        }
        if self.backoff_hours.is_none() {
            self.backoff_hours.clone_from(&fallback.backoff_hours);
        }
        if self.baseline_score.is_none() {
            self.baseline_score = fallback.baseline_score;
        }
    }
}

/// Built-in carrier table.
#[must_use]
pub fn default_carriers() -> BTreeMap<String, CarrierConfig> {
    BTreeMap::from([
        (
            "chronopost".to_string(),
            CarrierConfig::with_limit("Chronopost", RateLimit::per_minute(60)),
        ),
        (
            "ups".to_string(),
            CarrierConfig::with_limit("UPS", RateLimit::per_minute(30)),
        ),
        (
            "colissimo".to_string(),
            CarrierConfig::with_limit("Colissimo", RateLimit::per_day(1_000)),
        ),
        (
            "dhl".to_string(),
            CarrierConfig::with_limit("DHL", RateLimit::per_day(2_500)),
        ),
        (
            "fedex".to_string(),
            CarrierConfig::with_limit("FedEx", RateLimit::per_day(1_000)),
        ),
    ])
}

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: PathBuf,
    pub batch_size: u32,
    pub max_retries: u32,
    pub attempt_timeout_secs: u64,
    /// Pause between cycles in watch mode.
    pub interval_secs: u64,
    pub backoff_hours: Vec<u64>,
    /// Reuse a POD retrieved for the same shipment within this many days.
    /// 0 always asks the carrier.
    pub pod_cache_days: u32,
    pub scoring: ScoringWeights,
    pub notifier: NotifierConfig,
    pub carriers: BTreeMap<String, CarrierConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE),
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
            interval_secs: DEFAULT_INTERVAL_SECS,
            backoff_hours: DEFAULT_BACKOFF_HOURS.to_vec(),
            pod_cache_days: DEFAULT_POD_CACHE_DAYS,
            scoring: ScoringWeights::default(),
            notifier: NotifierConfig::default(),
            carriers: default_carriers(),
        }
    }
}

/// A config plus the file it came from, if any.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub path: Option<PathBuf>,
}

impl Config {
    /// Parses TOML text and merges carrier tables over the defaults.
    ///
    /// # Errors
    ///
    /// Returns the `toml` parse error.
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(raw)?;
        config.merge_default_carriers();
        Ok(config)
    }

    fn merge_default_carriers(&mut self) {
        let mut merged = BTreeMap::new();
        for (id, mut entry) in std::mem::take(&mut self.carriers) {
            let id = id.to_ascii_lowercase();
            if let Some(fallback) = default_carriers().get(&id) {
                entry.fill_from(fallback);
            }
            merged.insert(id, entry);
        }
        for (id, fallback) in default_carriers() {
            merged.entry(id).or_insert(fallback);
        }
        self.carriers = merged;
    }

    /// Loads from `explicit`, else from the default path, else defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when `explicit` is missing or unreadable,
    /// [`ConfigError::Parse`] for malformed TOML, and
    /// [`ConfigError::Invalid`] when a value is out of range.
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => resolve_default_config_path().filter(|path| path.exists()),
        };

        let Some(path) = path else {
            debug!("no config file found, using defaults");
            return Ok(LoadedConfig {
                config: Self::default(),
                path: None,
            });
        };

        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate()?;
        info!(path = %path.display(), "config loaded");
        Ok(LoadedConfig {
            config,
            path: Some(path),
        })
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler_config().validate().map_err(|e| {
            let field = match e {
                SchedulerError::InvalidPodCacheDays { .. } => "pod_cache_days",
                _ => "batch_size/max_retries",
            };
            invalid(field, e.to_string())
        })?;

        if !(1..=600).contains(&self.attempt_timeout_secs) {
            return Err(invalid(
                "attempt_timeout_secs",
                format!("{}. Expected range: 1..=600", self.attempt_timeout_secs),
            ));
        }
        if self.interval_secs == 0 {
            return Err(invalid("interval_secs", "must be at least 1"));
        }
        if self.backoff_hours.contains(&0) {
            return Err(invalid("backoff_hours", "steps must be at least one hour"));
        }
        if let NotifierConfig::Webhook { url } = &self.notifier
            && url::Url::parse(url).is_err()
        {
            return Err(invalid("notifier.url", format!("'{url}' is not a valid URL")));
        }

        for (id, carrier) in &self.carriers {
            if let Some(limit) = carrier.rate_limit
                && (limit.limit == 0 || limit.window_secs == 0)
            {
                return Err(invalid(
                    format!("carriers.{id}.rate_limit"),
                    "limit and window_secs must be positive",
                ));
            }
            if let Some(score) = carrier.baseline_score
                && !(0.0..=1.0).contains(&score)
            {
                return Err(invalid(
                    format!("carriers.{id}.baseline_score"),
                    format!("{score}. Expected range: 0.0..=1.0"),
                ));
            }
            if carrier.backoff_hours.as_ref().is_some_and(|h| h.contains(&0)) {
                return Err(invalid(
                    format!("carriers.{id}.backoff_hours"),
                    "steps must be at least one hour",
                ));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            default_backoff: BackoffSchedule::from_hours(&self.backoff_hours),
            pod_cache_days: self.pod_cache_days,
        }
    }

    /// Builds carrier profiles and HTTP adapters.
    ///
    /// Carriers without a `base_url` get a profile only. Their claims fail
    /// with an unsupported-carrier error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Adapter`] for an unusable base URL.
    pub fn build_registry(&self) -> Result<CarrierRegistry, ConfigError> {
        let mut registry = CarrierRegistry::new();
        for (id, carrier) in &self.carriers {
            let mut profile = CarrierProfile::new(id);
            if let Some(name) = &carrier.display_name {
                profile.display_name.clone_from(name);
            }
            if let Some(limit) = carrier.rate_limit {
                profile = profile.with_rate_limit(limit);
            }
            if let Some(hours) = &carrier.backoff_hours {
                profile = profile.with_backoff(BackoffSchedule::from_hours(hours));
            }
            if let Some(score) = carrier.baseline_score {
                profile = profile.with_baseline_score(score);
            }

            match &carrier.base_url {
                Some(base_url) => {
                    let api_key = carrier
                        .api_key_env
                        .as_deref()
                        .and_then(|name| env::var(name).ok());
                    let adapter =
                        HttpCarrierAdapter::new(id, base_url, api_key, self.attempt_timeout())?;
                    registry.register(profile, Arc::new(adapter));
                }
                None => {
                    debug!(carrier = %id, "no base_url configured - profile only");
                    registry.register_profile(profile);
                }
            }
        }
        Ok(registry)
    }

    /// Builds the configured notifier.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Notifier`] when the webhook client cannot be built.
    pub fn build_notifier(&self) -> Result<Arc<dyn Notifier>, ConfigError> {
        Ok(match &self.notifier {
            NotifierConfig::Log => Arc::new(LogNotifier),
            NotifierConfig::Webhook { url } => Arc::new(WebhookNotifier::new(url.clone())?),
        })
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/podfetch/config.toml`
/// 2. `$HOME/.config/podfetch/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("podfetch")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("podfetch")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}
