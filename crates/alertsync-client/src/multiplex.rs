use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{self, SelectAll};
use futures::{Stream, StreamExt};
use tracing::debug;

use alertsync_core::{LiveEvent, LiveTransport};

type EventStream = Pin<Box<dyn Stream<Item = LiveEvent> + Send>>;

/// Merges several live transports into one, in arrival order.
///
/// Ends once every inner transport has ended.
pub struct MultiTransport {
    streams: SelectAll<EventStream>,
    names: Vec<String>,
    name: String,
}

impl MultiTransport {
    pub fn new() -> Self {
        Self {
            streams: SelectAll::new(),
            names: Vec::new(),
            name: "multi()".into(),
        }
    }

    pub fn with(mut self, transport: Box<dyn LiveTransport>) -> Self {
        self.push(transport);
        self
    }

    pub fn push(&mut self, transport: Box<dyn LiveTransport>) {
        self.names.push(transport.name().to_owned());
        self.name = format!("multi({})", self.names.join(","));

        let stream = stream::unfold(transport, |mut transport| async move {
            let event = transport.next_event().await?;
            Some((event, transport))
        });
        self.streams.push(Box::pin(stream));
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

impl Default for MultiTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LiveTransport for MultiTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_event(&mut self) -> Option<LiveEvent> {
        let event = self.streams.next().await;
        if event.is_none() {
            debug!(transport = %self.name, "all live transports finished");
        }
        event
    }
}
