//! Live transport over a WebSocket, with reconnect and heartbeat.
//!
//! A supervisor task owns the socket and feeds `LiveEvent`s into a
//! bounded channel. Every successful handshake yields `Opened`; every
//! lost or failed connection yields `Closed`. Debouncing of those into
//! online/offline is left to the engine.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use alertsync_core::{LiveEvent, LiveTransport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Debug)]
pub struct WebSocketConfig {
    pub url: String,
    pub api_key: Option<SecretString>,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub heartbeat_interval: Duration,
    pub channel_capacity: usize,
}

impl WebSocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            channel_capacity: 256,
        }
    }
}

pub struct WebSocketTransport {
    name: String,
    rx: mpsc::Receiver<LiveEvent>,
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Start connecting in the background. Must be called from within a
    /// Tokio runtime.
    pub fn connect(config: WebSocketConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let cancel = CancellationToken::new();
        let name = format!("websocket({})", config.url);
        let supervisor = tokio::spawn(supervise(config, tx, cancel.clone()));
        Self {
            name,
            rx,
            cancel,
            supervisor: Some(supervisor),
        }
    }

    /// Stop reconnecting and close the socket.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(supervisor) = self.supervisor.take() {
            let _ = supervisor.await;
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl LiveTransport for WebSocketTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_event(&mut self) -> Option<LiveEvent> {
        self.rx.recv().await
    }
}

async fn supervise(config: WebSocketConfig, tx: mpsc::Sender<LiveEvent>, cancel: CancellationToken) {
    let mut failures: u32 = 0;
    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = open(&config) => result,
        };

        let reason = match connected {
            Ok(ws) => {
                failures = 0;
                info!(url = %config.url, "websocket connected");
                if tx.send(LiveEvent::Opened).await.is_err() {
                    return;
                }
                pump(ws, &tx, &config, &cancel).await
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                e
            }
        };

        if cancel.is_cancelled() {
            return;
        }
        warn!(url = %config.url, reason = %reason, failures, "websocket disconnected");
        if tx.send(LiveEvent::Closed { reason }).await.is_err() {
            return;
        }

        let delay = reconnect_delay(failures, config.min_backoff, config.max_backoff);
        debug!(delay_ms = delay.as_millis() as u64, "websocket reconnect scheduled");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn open(config: &WebSocketConfig) -> Result<WsStream, String> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| format!("invalid websocket url: {e}"))?;
    if let Some(key) = &config.api_key {
        let value = HeaderValue::from_str(key.expose_secret())
            .map_err(|e| format!("invalid api key header: {e}"))?;
        request.headers_mut().insert("x-api-key", value);
    }
    let (ws, _response) = connect_async(request)
        .await
        .map_err(|e| format!("connect failed: {e}"))?;
    Ok(ws)
}

/// Forward frames until the connection ends. Returns the close reason.
async fn pump(
    ws: WsStream,
    tx: &mpsc::Sender<LiveEvent>,
    config: &WebSocketConfig,
    cancel: &CancellationToken,
) -> String {
    let (mut sink, mut stream) = ws.split();
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                return "shutdown".into();
            }
            _ = heartbeat.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Default::default())).await {
                    return format!("heartbeat failed: {e}");
                }
            }
            msg = stream.next() => {
                let text = match msg {
                    Some(Ok(WsMessage::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!(bytes = bytes.len(), "ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        return frame
                            .map(|f| format!("closed by server: {} {}", u16::from(f.code), f.reason.as_str()))
                            .unwrap_or_else(|| "closed by server".into());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return format!("read failed: {e}"),
                    None => return "stream ended".into(),
                };
                if tx.send(LiveEvent::Frame(text)).await.is_err() {
                    return "receiver dropped".into();
                }
            }
        }
    }
}

/// Exponential backoff with up to 25% jitter, bounded by `[min, max]`.
fn reconnect_delay(failures: u32, min: Duration, max: Duration) -> Duration {
    let exp = min.saturating_mul(2u32.saturating_pow(failures.min(16)));
    let base = exp.min(max).max(min);
    let jitter_ms = (base.as_millis() as u64) / 4;
    let jitter = if jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=jitter_ms)
    } else {
        0
    };
    (base + Duration::from_millis(jitter)).min(max.max(min))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    async fn serve_once(frames: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for frame in frames {
                ws.send(WsMessage::Text(frame.into())).await.unwrap();
            }
            ws.close(None).await.unwrap();
            while ws.next().await.is_some() {}
        });
        format!("ws://{addr}")
    }

    fn config(url: String) -> WebSocketConfig {
        WebSocketConfig {
            min_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(100),
            ..WebSocketConfig::new(url)
        }
    }

    #[tokio::test]
    async fn forwards_frames_between_open_and_close() {
        let url = serve_once(vec![r#"{"id":1}"#, r#"{"type":"new_message"}"#]).await;
        let mut transport = WebSocketTransport::connect(config(url));

        assert_eq!(transport.next_event().await, Some(LiveEvent::Opened));
        assert_eq!(
            transport.next_event().await,
            Some(LiveEvent::Frame(r#"{"id":1}"#.into()))
        );
        assert_eq!(
            transport.next_event().await,
            Some(LiveEvent::Frame(r#"{"type":"new_message"}"#.into()))
        );
        assert!(matches!(
            transport.next_event().await,
            Some(LiveEvent::Closed { .. })
        ));
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn failed_connect_reports_closed_and_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let mut transport = WebSocketTransport::connect(config(url));
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(5), transport.next_event())
                .await
                .unwrap();
            assert!(matches!(event, Some(LiveEvent::Closed { .. })));
        }
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn sends_api_key_header() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut seen = None;
            let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                seen = req
                    .headers()
                    .get("x-api-key")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                Ok(resp)
            };
            let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();
            let _ = seen_tx.send(seen);
            drop(ws);
        });

        let mut transport = WebSocketTransport::connect(WebSocketConfig {
            api_key: Some(SecretString::from("ws-key".to_string())),
            ..config(url)
        });
        assert_eq!(transport.next_event().await, Some(LiveEvent::Opened));
        assert_eq!(seen_rx.await.unwrap().as_deref(), Some("ws-key"));
        transport.shutdown().await;
    }

    #[test]
    fn reconnect_delay_is_bounded() {
        let min = Duration::from_millis(100);
        let max = Duration::from_secs(2);
        for failures in 0..40 {
            let delay = reconnect_delay(failures, min, max);
            assert!(delay >= min && delay <= max, "{failures}: {delay:?}");
        }
        assert!(reconnect_delay(0, min, max) <= Duration::from_millis(125));
    }
}
