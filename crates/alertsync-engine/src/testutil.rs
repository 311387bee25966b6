use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use alertsync_core::{
    Category, CategoryToggles, FetchError, HistoryFetcher, Identity, LiveEvent, LiveTransport,
    Message, PreferenceSink, Role, TimeWindow,
};

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn msg(id: u64, category: Category, secs: i64) -> Message {
    Message::new(id, format!("message {id}"), category, at(secs))
}

pub fn identity(role: Role) -> Identity {
    Identity::new("ops@example.com", role, Some(Utc::now() + chrono::Duration::days(30)))
}

type Scripted = Result<Vec<Message>, FetchError>;

/// History fetcher replaying scripted pages and recording requested windows.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<VecDeque<Scripted>>,
    windows: Mutex<Vec<TimeWindow>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: Scripted) {
        self.responses.lock().push_back(response);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn windows(&self) -> Vec<TimeWindow> {
        self.windows.lock().clone()
    }
}

#[async_trait]
impl HistoryFetcher for ScriptedFetcher {
    async fn fetch_history(
        &self,
        _identity: &Identity,
        window: &TimeWindow,
    ) -> Result<Vec<Message>, FetchError> {
        self.windows.lock().push(*window);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Preference sink recording every push.
#[derive(Default)]
pub struct RecordingSink {
    pub pushed: Mutex<Vec<CategoryToggles>>,
    pub fail: Mutex<bool>,
}

#[async_trait]
impl PreferenceSink for RecordingSink {
    async fn push_notification_settings(
        &self,
        _identity: &Identity,
        settings: &CategoryToggles,
    ) -> Result<(), FetchError> {
        self.pushed.lock().push(*settings);
        if *self.fail.lock() {
            return Err(FetchError::Unreachable("sink offline".into()));
        }
        Ok(())
    }
}

/// Live transport fed from a channel.
pub struct ChannelTransport {
    rx: mpsc::UnboundedReceiver<LiveEvent>,
}

impl ChannelTransport {
    pub fn new() -> (mpsc::UnboundedSender<LiveEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl LiveTransport for ChannelTransport {
    fn name(&self) -> &str {
        "channel"
    }

    async fn next_event(&mut self) -> Option<LiveEvent> {
        self.rx.recv().await
    }
}
