use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use alertsync_core::{LiveEvent, LiveTransport};

/// Live transport fed by the platform's push-notification handler.
///
/// The handler keeps a `PushSender` and hands over each notification's
/// content object; the engine decodes it like any other frame.
pub struct PushTransport {
    rx: mpsc::Receiver<LiveEvent>,
}

#[derive(Clone)]
pub struct PushSender {
    tx: mpsc::Sender<LiveEvent>,
}

#[derive(Debug, thiserror::Error)]
#[error("push transport closed")]
pub struct PushClosed;

impl PushTransport {
    pub fn channel(capacity: usize) -> (PushSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (PushSender { tx }, Self { rx })
    }
}

impl PushSender {
    /// Deliver a notification's content object (`{"data": {...}}` or a
    /// bare message).
    pub async fn deliver(&self, content: &Value) -> Result<(), PushClosed> {
        self.deliver_raw(content.to_string()).await
    }

    pub async fn deliver_raw(&self, payload: String) -> Result<(), PushClosed> {
        debug!(bytes = payload.len(), "push notification received");
        self.tx
            .send(LiveEvent::Frame(payload))
            .await
            .map_err(|_| PushClosed)
    }
}

#[async_trait]
impl LiveTransport for PushTransport {
    fn name(&self) -> &str {
        "push"
    }

    async fn next_event(&mut self) -> Option<LiveEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn delivers_content_as_frame() {
        let (sender, mut transport) = PushTransport::channel(4);
        sender
            .deliver(&json!({"data": {"type": "new_message"}}))
            .await
            .unwrap();

        let Some(LiveEvent::Frame(raw)) = transport.next_event().await else {
            panic!("expected frame");
        };
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["data"]["type"], "new_message");
    }

    #[tokio::test]
    async fn ends_when_all_senders_drop() {
        let (sender, mut transport) = PushTransport::channel(4);
        drop(sender);
        assert_eq!(transport.next_event().await, None);
    }

    #[tokio::test]
    async fn delivering_after_transport_drop_fails() {
        let (sender, transport) = PushTransport::channel(4);
        drop(transport);
        assert!(sender.deliver_raw("{}".into()).await.is_err());
    }
}
