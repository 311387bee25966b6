use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthState {
    Online,
    /// Transport closed, grace period running. Still reported online.
    PendingOffline,
    Offline,
}

struct Inner {
    state: HealthState,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct Shared {
    inner: Mutex<Inner>,
    online_tx: watch::Sender<bool>,
}

/// Debounced connectivity signal derived from transport open/close events.
///
/// A close only becomes "offline" if no open follows within the debounce
/// period. Offline to online is immediate. Observers see each transition
/// at most once through `subscribe`.
#[derive(Clone)]
pub struct ConnectionHealth {
    shared: Arc<Shared>,
    debounce: Duration,
}

impl ConnectionHealth {
    pub fn new(debounce: Duration) -> Self {
        let (online_tx, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: HealthState::Online,
                    generation: 0,
                    timer: None,
                }),
                online_tx,
            }),
            debounce,
        }
    }

    pub fn on_open(&self) {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            HealthState::Online => {}
            HealthState::PendingOffline => {
                inner.generation += 1;
                if let Some(timer) = inner.timer.take() {
                    timer.abort();
                }
                inner.state = HealthState::Online;
            }
            HealthState::Offline => {
                inner.state = HealthState::Online;
                self.shared.online_tx.send_replace(true);
                info!("connection restored");
            }
        }
    }

    /// Must be called from within a Tokio runtime.
    pub fn on_close(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.state != HealthState::Online {
            return;
        }
        inner.generation += 1;
        inner.state = HealthState::PendingOffline;

        let generation = inner.generation;
        let shared = Arc::clone(&self.shared);
        let debounce = self.debounce;
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let mut inner = shared.inner.lock();
            if inner.state == HealthState::PendingOffline && inner.generation == generation {
                inner.state = HealthState::Offline;
                inner.timer = None;
                shared.online_tx.send_replace(false);
                warn!(debounce_secs = debounce.as_secs(), "connection lost");
            }
        }));
    }

    pub fn is_online(&self) -> bool {
        *self.shared.online_tx.borrow()
    }

    pub fn state(&self) -> HealthState {
        self.shared.inner.lock().state
    }

    /// Receiver that changes only on real online/offline transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shared.online_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn starts_online() {
        let health = ConnectionHealth::new(DEBOUNCE);
        assert!(health.is_online());
        assert_eq!(health.state(), HealthState::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn short_outage_is_not_reported() {
        let health = ConnectionHealth::new(DEBOUNCE);
        let rx = health.subscribe();

        health.on_close();
        assert_eq!(health.state(), HealthState::PendingOffline);
        assert!(health.is_online());

        tokio::time::sleep(Duration::from_secs(2)).await;
        health.on_open();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(health.state(), HealthState::Online);
        assert!(health.is_online());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn long_outage_goes_offline_once() {
        let health = ConnectionHealth::new(DEBOUNCE);
        let mut rx = health.subscribe();

        health.on_close();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(health.state(), HealthState::Offline);
        assert!(!health.is_online());
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());

        health.on_close();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn reopen_after_offline_is_immediate() {
        let health = ConnectionHealth::new(DEBOUNCE);
        let mut rx = health.subscribe();

        health.on_close();
        tokio::time::sleep(Duration::from_secs(6)).await;
        let _ = rx.borrow_and_update();

        health.on_open();
        assert!(health.is_online());
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test(start_paused = true)]
    async fn flapping_restarts_the_grace_period() {
        let health = ConnectionHealth::new(DEBOUNCE);

        health.on_close();
        tokio::time::sleep(Duration::from_secs(4)).await;
        health.on_open();
        health.on_close();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(health.state(), HealthState::PendingOffline);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(health.state(), HealthState::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_opens_are_noops() {
        let health = ConnectionHealth::new(DEBOUNCE);
        let rx = health.subscribe();
        health.on_open();
        health.on_open();
        assert!(!rx.has_changed().unwrap());
    }
}
