//! Client settings with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ClientSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `ALERTSYNC_*` environment overrides (highest priority)

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn, Level};

use alertsync_engine::SyncConfig;
use alertsync_telemetry::TelemetryConfig;

use crate::http::HttpFetcherConfig;
use crate::reliable::RetryConfig;
use crate::websocket::WebSocketConfig;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no API key configured (set api.apiKey or ALERTSYNC_API_KEY)")]
    MissingApiKey,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientSettings {
    pub api: ApiSettings,
    pub sync: SyncSettings,
    pub live: LiveSettings,
    pub retry: RetrySettings,
    pub storage: StorageSettings,
    pub telemetry: TelemetrySettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiSettings {
    pub base_url: String,
    /// Defaults to the base URL with a `ws` scheme.
    pub websocket_url: Option<String>,
    #[serde(skip_serializing, deserialize_with = "deserialize_secret")]
    pub api_key: Option<SecretString>,
    pub request_timeout_ms: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            websocket_url: None,
            api_key: None,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSettings {
    pub fetch_timeout_ms: u64,
    pub refresh_window_hours: u32,
    pub page_window_hours: u32,
    pub refresh_interval_secs: u64,
    pub offline_debounce_ms: u64,
    pub arrival_highlight_ms: u64,
    pub retention_cap: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 5_000,
            refresh_window_hours: 24,
            page_window_hours: 24,
            refresh_interval_secs: 300,
            offline_debounce_ms: 5_000,
            arrival_highlight_ms: 2_000,
            retention_cap: 2_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LiveSettings {
    pub websocket: bool,
    pub push: bool,
    pub reconnect_min_ms: u64,
    pub reconnect_max_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            websocket: true,
            push: false,
            reconnect_min_ms: 1_000,
            reconnect_max_ms: 30_000,
            heartbeat_interval_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 250,
            max_delay_ms: 2_000,
            jitter_factor: 0.2,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageSettings {
    /// Defaults to `~/.alertsync/alertsync.db`.
    pub database_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelemetrySettings {
    pub level: String,
    pub json: bool,
    pub log_to_sqlite: bool,
    /// Defaults to `~/.alertsync/logs.db`.
    pub log_db_path: Option<PathBuf>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            log_to_sqlite: true,
            log_db_path: None,
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.is_empty())
        .map(SecretString::from))
}

impl ClientSettings {
    pub fn sync_config(&self) -> SyncConfig {
        let s = &self.sync;
        SyncConfig {
            fetch_timeout: Duration::from_millis(s.fetch_timeout_ms),
            refresh_window: chrono::Duration::hours(i64::from(s.refresh_window_hours)),
            page_window: chrono::Duration::hours(i64::from(s.page_window_hours)),
            refresh_interval: Duration::from_secs(s.refresh_interval_secs),
            offline_debounce: Duration::from_millis(s.offline_debounce_ms),
            arrival_highlight: Duration::from_millis(s.arrival_highlight_ms),
            retention_cap: s.retention_cap,
            ..SyncConfig::default()
        }
    }

    pub fn http_config(&self) -> Result<HttpFetcherConfig, SettingsError> {
        let api_key = self.api.api_key.clone().ok_or(SettingsError::MissingApiKey)?;
        Ok(HttpFetcherConfig {
            base_url: self.api.base_url.clone(),
            api_key,
            request_timeout: Duration::from_millis(self.api.request_timeout_ms),
        })
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter_factor: self.retry.jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// `None` when the WebSocket channel is disabled.
    pub fn websocket_config(&self) -> Option<WebSocketConfig> {
        if !self.live.websocket {
            return None;
        }
        let url = self
            .api
            .websocket_url
            .clone()
            .unwrap_or_else(|| websocket_url_for(&self.api.base_url));
        Some(WebSocketConfig {
            api_key: self.api.api_key.clone(),
            min_backoff: Duration::from_millis(self.live.reconnect_min_ms),
            max_backoff: Duration::from_millis(self.live.reconnect_max_ms),
            heartbeat_interval: Duration::from_millis(self.live.heartbeat_interval_ms),
            ..WebSocketConfig::new(url)
        })
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        let log_level = Level::from_str(&self.telemetry.level).unwrap_or_else(|_| {
            warn!(level = %self.telemetry.level, "invalid log level, using info");
            Level::INFO
        });
        let defaults = TelemetryConfig::default();
        TelemetryConfig {
            log_level,
            json: self.telemetry.json,
            log_to_sqlite: self.telemetry.log_to_sqlite,
            log_db_path: self
                .telemetry
                .log_db_path
                .clone()
                .unwrap_or(defaults.log_db_path),
            module_levels: defaults.module_levels,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| alertsync_telemetry::data_dir().join("alertsync.db"))
    }
}

fn websocket_url_for(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}/ws")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}/ws")
    } else {
        format!("{base}/ws")
    }
}

/// Resolve the path to the settings file (`~/.alertsync/settings.json`).
pub fn settings_path() -> PathBuf {
    alertsync_telemetry::data_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ClientSettings, SettingsError> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ClientSettings, SettingsError> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<ClientSettings, SettingsError> {
    let defaults = serde_json::to_value(ClientSettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, everything else is replaced by `source`, and
/// nulls in `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

pub fn apply_env_overrides(settings: &mut ClientSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from `lookup`. Invalid values are ignored with a
/// warning.
pub fn apply_overrides<F>(settings: &mut ClientSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("ALERTSYNC_API_URL") {
        settings.api.base_url = v;
    }
    if let Some(v) = env.string("ALERTSYNC_WS_URL") {
        settings.api.websocket_url = Some(v);
    }
    if let Some(v) = env.string("ALERTSYNC_API_KEY") {
        settings.api.api_key = Some(SecretString::from(v));
    }
    if let Some(v) = env.u64("ALERTSYNC_REQUEST_TIMEOUT_MS", 100, 300_000) {
        settings.api.request_timeout_ms = v;
    }
    if let Some(v) = env.u64("ALERTSYNC_FETCH_TIMEOUT_MS", 100, 300_000) {
        settings.sync.fetch_timeout_ms = v;
    }
    if let Some(v) = env.u64("ALERTSYNC_REFRESH_INTERVAL_SECS", 10, 86_400) {
        settings.sync.refresh_interval_secs = v;
    }
    if let Some(v) = env.usize("ALERTSYNC_RETENTION_CAP", 1, 1_000_000) {
        settings.sync.retention_cap = v;
    }
    if let Some(v) = env.bool("ALERTSYNC_WEBSOCKET") {
        settings.live.websocket = v;
    }
    if let Some(v) = env.bool("ALERTSYNC_PUSH") {
        settings.live.push = v;
    }
    if let Some(v) = env.string("ALERTSYNC_DB_PATH") {
        settings.storage.database_path = Some(PathBuf::from(v));
    }
    if let Some(v) = env.string("ALERTSYNC_LOG_LEVEL") {
        settings.telemetry.level = v;
    }
    if let Some(v) = env.bool("ALERTSYNC_LOG_JSON") {
        settings.telemetry.json = v;
    }
}

/// Parse a boolean from common string representations.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_range<T: FromStr + PartialOrd>(val: &str, min: T, max: T) -> Option<T> {
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}
