mod logging;

pub use logging::{LogRecord, SqliteLogLayer, SqliteLogSink, DEFAULT_RETAINED};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "alertsync_client" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stdout instead of human-readable output.
    pub json: bool,
    /// Whether to persist warn+ logs to SQLite.
    pub log_to_sqlite: bool,
    /// Path to the log database.
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            log_to_sqlite: true,
            log_db_path: data_dir().join("logs.db"),
        }
    }
}

/// Keeps the warning sink alive for the life of the process.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    /// Persisted warnings, when SQLite logging is enabled.
    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.log_sink.as_deref()
    }
}

/// Build an `EnvFilter` directive string such as `info,alertsync_client=debug`.
pub fn filter_directives(level: Level, module_levels: &[(String, Level)]) -> String {
    let mut directives = level.to_string().to_lowercase();
    for (module, level) in module_levels {
        directives.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    directives
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let directives = filter_directives(config.log_level, &config.module_levels);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    let log_sink = if config.log_to_sqlite {
        match SqliteLogSink::open(&config.log_db_path, DEFAULT_RETAINED) {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                eprintln!("alertsync-telemetry: failed to open log DB: {e}");
                None
            }
        }
    } else {
        None
    };
    let sqlite_layer = log_sink.as_ref().map(|sink| SqliteLogLayer::new(Arc::clone(sink)));

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sqlite_layer)
        .try_init()
    {
        eprintln!("alertsync-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard { log_sink }
}

/// Default directory for the client's local data.
pub fn data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".alertsync")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_module_overrides() {
        let levels = vec![
            ("alertsync_client".to_string(), Level::DEBUG),
            ("alertsync_store".to_string(), Level::WARN),
        ];
        assert_eq!(
            filter_directives(Level::INFO, &levels),
            "info,alertsync_client=debug,alertsync_store=warn"
        );
    }

    #[test]
    fn directives_without_overrides() {
        assert_eq!(filter_directives(Level::WARN, &[]), "warn");
    }

    #[test]
    fn default_config_paths() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.log_db_path.ends_with(".alertsync/logs.db"));
        assert!(!config.json);
    }
}
