use std::time::Duration;

/// Timing and sizing knobs for the sync engine.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Upper bound on a single history fetch.
    pub fetch_timeout: Duration,
    /// Span of the "most recent" window fetched by `refresh`.
    pub refresh_window: chrono::Duration,
    /// Span of each older page fetched by `load_more`.
    pub page_window: chrono::Duration,
    /// Period of the background refresh task.
    pub refresh_interval: Duration,
    /// How long a closed transport may stay closed before the client is
    /// reported offline.
    pub offline_debounce: Duration,
    /// Lifetime of the "recently arrived" highlight.
    pub arrival_highlight: Duration,
    /// Maximum number of messages kept locally; the oldest are evicted.
    pub retention_cap: usize,
    /// Capacity of the engine event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(5),
            refresh_window: chrono::Duration::hours(24),
            page_window: chrono::Duration::hours(24),
            refresh_interval: Duration::from_secs(300),
            offline_debounce: Duration::from_secs(5),
            arrival_highlight: Duration::from_secs(2),
            retention_cap: 2000,
            event_capacity: 256,
        }
    }
}
