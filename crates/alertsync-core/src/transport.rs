use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::errors::FetchError;
use crate::identity::Identity;
use crate::message::Message;
use crate::toggles::CategoryToggles;

/// Half-open time interval `[start, end)` used for history queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Returns `None` when `start` is not strictly before `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Window of length `span` ending at `end`.
    pub fn ending_at(end: DateTime<Utc>, span: Duration) -> Option<Self> {
        Self::new(end - span, end)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Time-windowed source of past messages (REST history endpoint).
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    async fn fetch_history(
        &self,
        identity: &Identity,
        window: &TimeWindow,
    ) -> Result<Vec<Message>, FetchError>;
}

/// Lifecycle or payload event from a live delivery channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LiveEvent {
    Opened,
    Closed { reason: String },
    /// Raw payload, decoded by the engine.
    Frame(String),
}

/// A push-style channel (WebSocket, FCM, Expo push) delivering events
/// one at a time. Reconnection is the transport's own business.
#[async_trait]
pub trait LiveTransport: Send {
    fn name(&self) -> &str;

    /// Next event, or `None` once the transport has shut down for good.
    /// Must be cancel-safe: it is polled inside `select!`.
    async fn next_event(&mut self) -> Option<LiveEvent>;
}

/// Backend endpoint mirroring the user's notification preferences so the
/// server-side push fan-out can honour them.
#[async_trait]
pub trait PreferenceSink: Send + Sync {
    async fn push_notification_settings(
        &self,
        identity: &Identity,
        settings: &CategoryToggles,
    ) -> Result<(), FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_rejects_empty_or_inverted() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(TimeWindow::new(t, t).is_none());
        assert!(TimeWindow::new(t, t - Duration::hours(1)).is_none());
        assert!(TimeWindow::ending_at(t, Duration::zero()).is_none());
    }

    #[test]
    fn window_is_half_open() {
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let window = TimeWindow::ending_at(end, Duration::hours(24)).unwrap();
        assert!(window.contains(window.start));
        assert!(!window.contains(end));
        assert!(window.contains(end - Duration::seconds(1)));
    }
}
