//! Configuration infrastructure
//!
//! Layered configuration: serde defaults, then an optional config file,
//! then `STOREFRONT_SYNC_*` environment overrides. Per-source sync tuning
//! is expressed as overrides on top of the built-in source profiles.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::domain::source::{Source, SourceProfile};

/// Named defaults shared by config and the operational binary.
pub mod defaults {
    /// Recent range covered by an ad-hoc `sync_all`.
    pub const RANGE_DAYS: u32 = 30;
    /// Range covered by a backfill when the caller gives no size.
    pub const BACKFILL_DAYS: u32 = 365;
    pub const DB_MAX_CONNECTIONS: u32 = 10;
    pub const LOG_LEVEL: &str = "info";
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Explicit sqlite URL; defaults to a file under the user data dir.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: defaults::DB_MAX_CONNECTIONS,
        }
    }
}

impl DatabaseConfig {
    /// Resolve the sqlite URL, creating a default path when unset.
    pub fn resolve_url(&self) -> Result<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow!("could not determine user data directory"))?
            .join("storefront-sync");
        Ok(format!("sqlite:{}", data_dir.join("sync.db").display()))
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    /// Enable JSON formatted logs
    pub json_format: bool,
    /// Enable console output
    pub console_output: bool,
    /// Enable file output
    pub file_output: bool,
    /// Directory for log files; defaults next to the executable
    pub directory: Option<PathBuf>,
    /// Module-specific log level filters (e.g., "sqlx": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            directory: None,
            module_filters: HashMap::new(),
        }
    }
}

/// Sync engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub default_range_days: u32,
    pub default_backfill_days: u32,
    /// Per-source overrides keyed by source name.
    pub profiles: HashMap<String, ProfileOverride>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            default_range_days: defaults::RANGE_DAYS,
            default_backfill_days: defaults::BACKFILL_DAYS,
            profiles: HashMap::new(),
        }
    }
}

impl SyncSettings {
    /// The effective profile for a source: built-in defaults with any
    /// configured overrides applied.
    pub fn profile_for(&self, source: Source) -> SourceProfile {
        let mut profile = SourceProfile::for_source(source);
        if let Some(overrides) = self.profiles.get(source.as_str()) {
            overrides.apply(&mut profile);
        }
        profile
    }
}

/// Partial profile: only set fields override the built-in default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileOverride {
    pub max_window_days: Option<u32>,
    pub pacing_delay_ms: Option<u64>,
    pub max_history_days: Option<u32>,
    pub freshness_lag_days: Option<u32>,
    pub request_timeout_seconds: Option<u64>,
    pub max_requests_per_second: Option<u32>,
}

impl ProfileOverride {
    pub fn apply(&self, profile: &mut SourceProfile) {
        if let Some(v) = self.max_window_days {
            profile.max_window_days = v;
        }
        if let Some(v) = self.pacing_delay_ms {
            profile.pacing_delay_ms = v;
        }
        if let Some(v) = self.max_history_days {
            profile.max_history_days = Some(v);
        }
        if let Some(v) = self.freshness_lag_days {
            profile.freshness_lag_days = v;
        }
        if let Some(v) = self.request_timeout_seconds {
            profile.request_timeout_seconds = v;
        }
        if let Some(v) = self.max_requests_per_second {
            profile.max_requests_per_second = v;
        }
    }
}

/// Loads and persists the application configuration.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Manager over the default config location in the user config dir.
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("could not determine user config directory"))?
            .join("storefront-sync");
        Ok(Self {
            config_path: config_dir.join("config.json"),
        })
    }

    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load configuration: defaults, then the config file when present,
    /// then `STOREFRONT_SYNC_*` environment variables (double underscore
    /// separates nesting, e.g. `STOREFRONT_SYNC_LOGGING__LEVEL=debug`).
    pub fn load_config(&self) -> Result<AppConfig> {
        let settings = config::Config::builder()
            .add_source(config::File::from(self.config_path.clone()).required(false))
            .add_source(
                config::Environment::with_prefix("STOREFRONT_SYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to assemble configuration")?;

        let app_config: AppConfig = settings
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        Ok(app_config)
    }

    /// Write the given configuration as pretty JSON, creating parent dirs.
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(config)?;
        fs::write(&self.config_path, contents).await?;
        info!("configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Create a default config file if none exists yet.
    pub async fn ensure_config_exists(&self) -> Result<()> {
        if !self.config_path.exists() {
            self.save_config(&AppConfig::default()).await?;
        }
        Ok(())
    }
}
