use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use alertsync_core::storage::keys;
use alertsync_core::{
    decode_live_frame, Category, CategoryToggles, DurableStore, HistoryFetcher, Identity,
    IdentityProvider, LiveEvent, LiveFrame, LiveTransport, Message, PreferenceSink,
};

use crate::config::SyncConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, SyncTrigger};
use crate::health::ConnectionHealth;
use crate::message_store::{IngestOutcome, MessageStore, SyncOutcome};
use crate::policy::{is_subscription_expired, should_alert};
use crate::preferences::ToggleStore;
use crate::read_model::{load_more_cursor, query, ArrivalDecorations, Feed, FeedItem, FeedPage};

/// Orchestrates the message store, preferences, connection health and
/// live delivery for one signed-in client.
pub struct SyncEngine {
    config: SyncConfig,
    store: MessageStore,
    notifications: ToggleStore,
    filters: ToggleStore,
    health: ConnectionHealth,
    decorations: ArrivalDecorations,
    /// Start of the last window fetched by `load_more`.
    page_cursor: Mutex<Option<DateTime<Utc>>>,
    identity: Arc<dyn IdentityProvider>,
    preference_sink: Option<Arc<dyn PreferenceSink>>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl SyncEngine {
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: SyncConfig,
        durable: Arc<dyn DurableStore>,
        fetcher: Arc<dyn HistoryFetcher>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            store: MessageStore::new(
                Arc::clone(&durable),
                fetcher,
                config.fetch_timeout,
                config.retention_cap,
            ),
            notifications: ToggleStore::new(Arc::clone(&durable), keys::NOTIFICATION_SETTINGS),
            filters: ToggleStore::new(durable, keys::MESSAGE_FILTERS),
            health: ConnectionHealth::new(config.offline_debounce),
            decorations: ArrivalDecorations::new(config.arrival_highlight),
            page_cursor: Mutex::new(None),
            identity,
            preference_sink: None,
            event_tx,
            config,
        }
    }

    /// Mirror notification preference changes to the backend.
    pub fn with_preference_sink(mut self, sink: Arc<dyn PreferenceSink>) -> Self {
        self.preference_sink = Some(sink);
        self
    }

    /// Load the cached messages. Does not touch the network; callers
    /// follow up with `refresh`.
    pub async fn start(&self) -> Vec<Message> {
        self.store.load_initial().await
    }

    /// Current feed for `search`, gated by role, filters and subscription.
    pub fn messages(&self, search: &str) -> Result<Feed, EngineError> {
        let Some(identity) = self.identity.current() else {
            return Ok(Feed::SignedOut);
        };
        if is_subscription_expired(&identity, Utc::now()) {
            return Ok(Feed::Gated);
        }

        let filters = self.filters.load(identity.role)?.toggles;
        let held = self.store.snapshot();
        let items = query(&held, search, &filters, identity.role)
            .into_iter()
            .map(|message| FeedItem {
                recently_arrived: self.decorations.is_recent(&message.id),
                message,
            })
            .collect();

        Ok(Feed::Messages(FeedPage {
            items,
            online: self.health.is_online(),
            cursor: self.page_end(load_more_cursor(&held)),
        }))
    }

    /// Sync the most recent window.
    pub async fn refresh(&self) -> Result<SyncOutcome, EngineError> {
        self.refresh_with(SyncTrigger::Manual).await
    }

    /// Sync the page just older than both the oldest held message and
    /// the previous page, so empty days are stepped over.
    #[instrument(skip(self))]
    pub async fn load_more(&self) -> Result<SyncOutcome, EngineError> {
        let identity = self.require_identity()?;
        let end = self.page_end(self.store.oldest()).unwrap_or_else(Utc::now);
        let start = end - self.config.page_window;
        let outcome = self.store.sync_window(&identity, end, start).await?;
        if outcome.is_success() {
            let mut cursor = self.page_cursor.lock();
            *cursor = Some(cursor.map_or(start, |held| held.min(start)));
        }
        self.report(SyncTrigger::LoadMore, &outcome);
        Ok(outcome)
    }

    pub fn is_online(&self) -> bool {
        self.health.is_online()
    }

    pub fn health(&self) -> &ConnectionHealth {
        &self.health
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Notification preferences for the current role. Freshly created
    /// defaults are mirrored to the backend.
    pub async fn preferences(&self) -> Result<CategoryToggles, EngineError> {
        let identity = self.require_identity()?;
        let loaded = self.notifications.load(identity.role)?;
        if loaded.created {
            self.push_preferences(&identity, &loaded.toggles).await;
        }
        Ok(loaded.toggles)
    }

    #[instrument(skip(self))]
    pub async fn toggle_preference(
        &self,
        category: Category,
        value: bool,
    ) -> Result<CategoryToggles, EngineError> {
        let identity = self.require_identity()?;
        let updated = self.notifications.set(identity.role, &category, value)?;
        self.push_preferences(&identity, &updated).await;
        Ok(updated)
    }

    pub fn filters(&self) -> Result<CategoryToggles, EngineError> {
        let identity = self.require_identity()?;
        Ok(self.filters.load(identity.role)?.toggles)
    }

    #[instrument(skip(self))]
    pub fn toggle_filter(
        &self,
        category: Category,
        value: bool,
    ) -> Result<CategoryToggles, EngineError> {
        let identity = self.require_identity()?;
        self.filters.set(identity.role, &category, value)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Store a message delivered outside a `LiveTransport` (e.g. a push
    /// notification handed over by the platform).
    pub fn ingest_live(&self, message: Message) -> IngestOutcome {
        let outcome = self.store.ingest_live(message.clone());
        if !outcome.is_new {
            debug!(message_id = %message.id, "duplicate live message");
            return outcome;
        }
        self.decorations.mark(message.id.clone());

        let alert = match self.identity.current() {
            Some(identity) => match self.notifications.load(identity.role) {
                Ok(loaded) => should_alert(&message, &loaded.toggles, &identity, Utc::now()),
                Err(e) => {
                    warn!(error = %e, "failed to read notification preferences");
                    false
                }
            },
            None => false,
        };
        info!(message_id = %message.id, category = %message.category, alert, "live message stored");
        let _ = self
            .event_tx
            .send(EngineEvent::MessageArrived { message, alert });
        outcome
    }

    /// Apply one event from a live transport.
    pub async fn handle_live_event(&self, event: LiveEvent) {
        match event {
            LiveEvent::Opened => self.health.on_open(),
            LiveEvent::Closed { reason } => {
                debug!(reason = %reason, "live transport closed");
                self.health.on_close();
            }
            LiveEvent::Frame(raw) => match decode_live_frame(&raw) {
                Ok(LiveFrame::Message(message)) => {
                    self.ingest_live(message);
                }
                Ok(LiveFrame::RefreshHint) => {
                    self.refresh_logged(SyncTrigger::RefreshHint).await;
                }
                Err(e) => warn!(error = %e, bytes = raw.len(), "dropping malformed live frame"),
            },
        }
    }

    /// Drive the engine until cancelled or the transport shuts down.
    ///
    /// Owns the single periodic refresh and the refresh-on-reconnect.
    pub async fn run<T>(&self, transport: &mut T, cancel: CancellationToken)
    where
        T: LiveTransport + ?Sized,
    {
        let mut online_rx = self.health.subscribe();
        let period = self.config.refresh_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(transport = transport.name(), "sync engine running");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("sync engine cancelled");
                    break;
                }
                event = transport.next_event() => match event {
                    Some(event) => self.handle_live_event(event).await,
                    None => {
                        info!(transport = transport.name(), "live transport finished");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.decorations.prune();
                    self.refresh_logged(SyncTrigger::Periodic).await;
                }
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    let _ = self.event_tx.send(EngineEvent::ConnectivityChanged { online });
                    if online {
                        self.refresh_logged(SyncTrigger::Reconnect).await;
                    }
                }
            }
        }
    }

    /// Drop every held message. Preferences and filters are kept; the
    /// session collaborator clears the identity.
    pub async fn logout(&self) {
        self.store.clear_all().await;
        self.decorations.clear();
        *self.page_cursor.lock() = None;
    }

    fn page_end(&self, oldest: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match (oldest, *self.page_cursor.lock()) {
            (Some(oldest), Some(cursor)) => Some(oldest.min(cursor)),
            (oldest, cursor) => oldest.or(cursor),
        }
    }

    async fn refresh_with(&self, trigger: SyncTrigger) -> Result<SyncOutcome, EngineError> {
        let identity = self.require_identity()?;
        let end = Utc::now();
        let start = end - self.config.refresh_window;
        let outcome = self.store.sync_window(&identity, end, start).await?;
        self.report(trigger, &outcome);
        Ok(outcome)
    }

    async fn refresh_logged(&self, trigger: SyncTrigger) {
        if let Err(e) = self.refresh_with(trigger).await {
            debug!(?trigger, error = %e, "refresh skipped");
        }
    }

    fn report(&self, trigger: SyncTrigger, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Synced { added, .. } => {
                let _ = self.event_tx.send(EngineEvent::Synced {
                    trigger,
                    added: *added,
                });
            }
            SyncOutcome::Unauthorized { .. } => {
                let _ = self.event_tx.send(EngineEvent::ReauthRequired);
            }
            SyncOutcome::Unavailable { .. } => {}
        }
    }

    async fn push_preferences(&self, identity: &Identity, settings: &CategoryToggles) {
        let Some(sink) = &self.preference_sink else {
            return;
        };
        if let Err(e) = sink.push_notification_settings(identity, settings).await {
            warn!(error = %e, kind = e.error_kind(), "failed to sync notification settings");
        }
    }

    fn require_identity(&self) -> Result<Identity, EngineError> {
        self.identity.current().ok_or(EngineError::NotSignedIn)
    }
}
