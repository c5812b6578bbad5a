use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;

use crate::broadcast::Deliverer;
use crate::dataset::cache::TabularCache;
use crate::dataset::source::DatasetSource;
use crate::error::ConfigError;
use crate::registry::{Recipient, RecipientRegistry};
use crate::types::Config;

/// Process-wide state shared by the scheduler, the dispatcher and the chat poller.
/// Nothing here survives a restart.
pub struct AppState {
    pub config: Config,
    pub timezone: Tz,
    pub cache: TabularCache,
    pub registry: RecipientRegistry,
    pub deliverer: Arc<dyn Deliverer>,
    last_scheduled_run: Mutex<Option<DateTime<Utc>>>,
}

impl AppState {
    pub fn new(
        config: Config,
        source: Arc<dyn DatasetSource>,
        deliverer: Arc<dyn Deliverer>,
    ) -> Result<Self, ConfigError> {
        let timezone: Tz = config
            .schedule
            .timezone
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("Invalid timezone: {}", config.schedule.timezone)))?;

        let ttl = i64::try_from(config.cache_ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(|| ConfigError::Invalid(format!("cacheTtlSecs out of range: {}", config.cache_ttl_secs)))?;
        let cache = TabularCache::new(source, config.dataset_format, config.columns.clone(), ttl);
        let registry = RecipientRegistry::with_recipients(
            config
                .telegram
                .initial_recipients
                .iter()
                .map(|id| Recipient::new(id.trim()))
                .filter(|r| !r.as_str().is_empty()),
        );

        Ok(Self {
            config,
            timezone,
            cache,
            registry,
            deliverer,
            last_scheduled_run: Mutex::new(None),
        })
    }

    /// Wall-clock time in the configured timezone
    pub fn local_now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.timezone).naive_local()
    }

    /// Record when a scheduled run last occurred
    pub fn set_last_scheduled_run(&self, time: DateTime<Utc>) {
        *self.last_scheduled_run.lock() = Some(time);
    }

    /// Get when the report last ran on schedule
    pub fn get_last_scheduled_run(&self) -> Option<DateTime<Utc>> {
        *self.last_scheduled_run.lock()
    }
}

/// Default config location: ~/.pontis/config.json
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".pontis").join("config.json"))
}

/// Load configuration from `path`, then apply environment overrides.
///
/// A missing file is not an error: every field has a default and the
/// dataset URL can come from `PONTIS_DATASET_URL`.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) if path.exists() => {
            let content = fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        }
        Some(path) => {
            log::info!("No config file at {}, using defaults", path.display());
            Config::default()
        }
        None => Config::default(),
    };

    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
