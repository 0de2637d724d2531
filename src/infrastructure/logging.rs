//! Logging system configuration and initialization
//!
//! Console and optional file logging over tracing-subscriber, driven by
//! `LoggingConfig`. Dependency noise (sqlx row logs and friends) is
//! suppressed unless the configured level is `trace`; `RUST_LOG` always
//! wins when set.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use once_cell::sync::Lazy;
use tracing_appender::non_blocking;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

pub use crate::infrastructure::config::LoggingConfig;

// Keeps non-blocking writer guards alive for the process lifetime.
static LOG_GUARDS: Lazy<Mutex<Vec<non_blocking::WorkerGuard>>> =
    Lazy::new(|| Mutex::new(Vec::new()));

/// Log directory next to the executable, matching where operators look.
pub fn default_log_directory() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(std::path::Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
    exe_dir.join("logs")
}

/// Initialize logging with default configuration.
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Initialize the global subscriber from configuration.
///
/// Safe to call once per process; later calls return an error from the
/// global registry and can be ignored in tests.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let filter = build_env_filter(config);

    let console_layer = config.console_output.then(|| {
        let layer = fmt::layer().with_target(true);
        if config.json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        }
    });

    let file_layer = if config.file_output {
        let log_dir = config
            .directory
            .clone()
            .unwrap_or_else(default_log_directory);
        std::fs::create_dir_all(&log_dir)?;
        let appender = tracing_appender::rolling::daily(log_dir, "storefront-sync.log");
        let (writer, guard) = non_blocking(appender);
        if let Ok(mut guards) = LOG_GUARDS.lock() {
            guards.push(guard);
        }
        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        Some(if config.json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        })
    } else {
        None
    };

    Registry::default()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(level = %config.level, "logging initialized");
    Ok(())
}

fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::try_new(filter_directives(config))
        .unwrap_or_else(|_| EnvFilter::new(crate::infrastructure::config::defaults::LOG_LEVEL))
}

/// Filter directives derived from configuration, lowest priority first.
fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = vec![config.level.clone()];
    if config.level != "trace" {
        // Dependency internals drown real progress at debug and below.
        directives.push("sqlx=warn".to_string());
        directives.push("hyper=warn".to_string());
        directives.push("tokio_util=warn".to_string());
    }
    for (module, level) in &config.module_filters {
        directives.push(format!("{module}={level}"));
    }
    directives.join(",")
}
