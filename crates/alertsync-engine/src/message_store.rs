use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use alertsync_core::storage::keys;
use alertsync_core::{
    DurableStore, FetchError, HistoryFetcher, Identity, Message, MessageId, TimeWindow,
};

use crate::error::EngineError;

/// Result of a history sync.
///
/// Network and auth failures are outcomes, not errors: the local state is
/// left untouched and the caller decides how to surface them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced { added: usize, fetched: usize },
    Unavailable { error: FetchError },
    Unauthorized { error: FetchError },
}

impl SyncOutcome {
    fn failed(error: FetchError) -> Self {
        if error.requires_reauth() {
            Self::Unauthorized { error }
        } else {
            Self::Unavailable { error }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Synced { .. })
    }

    /// Number of previously unknown messages merged in.
    pub fn added(&self) -> usize {
        match self {
            Self::Synced { added, .. } => *added,
            _ => 0,
        }
    }
}

/// Result of ingesting a single live message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestOutcome {
    pub is_new: bool,
}

enum PersistOp {
    Write(Vec<u8>),
    Clear,
    Flush(oneshot::Sender<()>),
}

/// Authoritative local set of messages, keyed by id.
///
/// Mutations update memory synchronously and hand a snapshot to a single
/// background persister, so durable writes land in mutation order and
/// never block the caller.
pub struct MessageStore {
    messages: Mutex<HashMap<MessageId, Message>>,
    /// Bumped by `clear_all` with the lock held. Pages fetched under an
    /// older epoch are dropped.
    epoch: AtomicU64,
    durable: Arc<dyn DurableStore>,
    fetcher: Arc<dyn HistoryFetcher>,
    persist_tx: mpsc::UnboundedSender<PersistOp>,
    fetch_timeout: Duration,
    retention_cap: usize,
}

impl MessageStore {
    /// Must be called from within a Tokio runtime.
    pub fn new(
        durable: Arc<dyn DurableStore>,
        fetcher: Arc<dyn HistoryFetcher>,
        fetch_timeout: Duration,
        retention_cap: usize,
    ) -> Self {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_persister(Arc::clone(&durable), persist_rx));
        Self {
            messages: Mutex::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            durable,
            fetcher,
            persist_tx,
            fetch_timeout,
            retention_cap: retention_cap.max(1),
        }
    }

    /// Read the durable snapshot into memory and return it in feed order.
    ///
    /// A missing or unreadable snapshot yields an empty list.
    #[instrument(skip(self))]
    pub async fn load_initial(&self) -> Vec<Message> {
        let durable = Arc::clone(&self.durable);
        let raw = match tokio::task::spawn_blocking(move || durable.get(keys::MESSAGES)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to read message snapshot");
                None
            }
            Err(e) => {
                warn!(error = %e, "snapshot read task failed");
                None
            }
        };

        let cached: Vec<Message> = match raw {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(error = %e, "discarding unreadable message snapshot");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut map = self.messages.lock();
        for message in cached {
            map.entry(message.id.clone()).or_insert(message);
        }
        self.evict_over_cap(&mut map);
        info!(count = map.len(), "loaded cached messages");
        sorted(&map)
    }

    /// Fetch `[window_start, window_end)` and merge it into the store.
    ///
    /// Incoming copies replace held copies with the same id. On success
    /// the durable snapshot is written before returning. A page whose
    /// fetch overlapped a `clear_all` is dropped and reported with
    /// `added: 0`.
    #[instrument(skip(self, identity), fields(account_id = %identity.account_id))]
    pub async fn sync_window(
        &self,
        identity: &Identity,
        window_end: DateTime<Utc>,
        window_start: DateTime<Utc>,
    ) -> Result<SyncOutcome, EngineError> {
        let window = TimeWindow::new(window_start, window_end).ok_or(
            EngineError::InvalidWindow {
                start: window_start,
                end: window_end,
            },
        )?;

        let epoch = self.epoch.load(Ordering::Acquire);
        let fetch = self.fetcher.fetch_history(identity, &window);
        let page = match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(Ok(page)) => page,
            Ok(Err(error)) => {
                warn!(error = %error, kind = error.error_kind(), "history fetch failed");
                return Ok(SyncOutcome::failed(error));
            }
            Err(_) => {
                warn!(timeout = ?self.fetch_timeout, "history fetch timed out");
                return Ok(SyncOutcome::failed(FetchError::Timeout(self.fetch_timeout)));
            }
        };

        let fetched = page.len();
        let Some(added) = self.merge_page(page, epoch) else {
            info!(fetched, "store cleared during fetch, page dropped");
            return Ok(SyncOutcome::Synced { added: 0, fetched });
        };
        self.flush().await;
        debug!(fetched, added, "history window merged");
        Ok(SyncOutcome::Synced { added, fetched })
    }

    /// Insert a message delivered by a live channel.
    ///
    /// Already-held ids are left as they are. Persistence is queued and not
    /// awaited.
    pub fn ingest_live(&self, message: Message) -> IngestOutcome {
        let mut map = self.messages.lock();
        if map.contains_key(&message.id) {
            return IngestOutcome { is_new: false };
        }
        let id = message.id.clone();
        map.insert(id.clone(), message);
        self.evict_over_cap(&mut map);
        let is_new = map.contains_key(&id);
        self.enqueue_snapshot(&map);
        IngestOutcome { is_new }
    }

    /// Drop every message from memory and durable storage.
    pub async fn clear_all(&self) {
        {
            let mut map = self.messages.lock();
            map.clear();
            self.epoch.fetch_add(1, Ordering::AcqRel);
            let _ = self.persist_tx.send(PersistOp::Clear);
        }
        self.flush().await;
        info!("message store cleared");
    }

    /// All held messages in feed order.
    pub fn snapshot(&self) -> Vec<Message> {
        sorted(&self.messages.lock())
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.lock().contains_key(id)
    }

    /// Timestamp of the oldest held message.
    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.messages.lock().values().map(|m| m.occurred_at).min()
    }

    /// Wait until every queued durable write has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.persist_tx.send(PersistOp::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn merge_page(&self, page: Vec<Message>, epoch: u64) -> Option<usize> {
        let mut map = self.messages.lock();
        if self.epoch.load(Ordering::Acquire) != epoch {
            return None;
        }
        let mut inserted = Vec::new();
        for message in page {
            let id = message.id.clone();
            if map.insert(id.clone(), message).is_none() {
                inserted.push(id);
            }
        }
        self.evict_over_cap(&mut map);
        self.enqueue_snapshot(&map);
        Some(inserted.iter().filter(|id| map.contains_key(*id)).count())
    }

    fn evict_over_cap(&self, map: &mut HashMap<MessageId, Message>) {
        if map.len() <= self.retention_cap {
            return;
        }
        let ordered = sorted(map);
        let evicted = ordered.len() - self.retention_cap;
        for message in &ordered[self.retention_cap..] {
            map.remove(&message.id);
        }
        debug!(evicted, "evicted messages over retention cap");
    }

    // Called with the lock held so snapshots queue in mutation order.
    fn enqueue_snapshot(&self, map: &HashMap<MessageId, Message>) {
        match serde_json::to_vec(&sorted(map)) {
            Ok(bytes) => {
                let _ = self.persist_tx.send(PersistOp::Write(bytes));
            }
            Err(e) => warn!(error = %e, "failed to serialize message snapshot"),
        }
    }
}

fn sorted(map: &HashMap<MessageId, Message>) -> Vec<Message> {
    let mut messages: Vec<Message> = map.values().cloned().collect();
    messages.sort_by(Message::feed_order);
    messages
}

async fn run_persister(durable: Arc<dyn DurableStore>, mut rx: mpsc::UnboundedReceiver<PersistOp>) {
    while let Some(op) = rx.recv().await {
        let write = match op {
            PersistOp::Flush(done) => {
                let _ = done.send(());
                continue;
            }
            PersistOp::Write(bytes) => {
                let durable = Arc::clone(&durable);
                tokio::task::spawn_blocking(move || durable.set(keys::MESSAGES, &bytes)).await
            }
            PersistOp::Clear => {
                let durable = Arc::clone(&durable);
                tokio::task::spawn_blocking(move || durable.remove(keys::MESSAGES)).await
            }
        };
        match write {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to persist message snapshot"),
            Err(e) => warn!(error = %e, "persist task failed"),
        }
    }
}
