pub mod http;
pub mod multiplex;
pub mod push;
pub mod reliable;
pub mod settings;
pub mod websocket;

pub use http::{HttpBackend, HttpFetcherConfig};
pub use multiplex::MultiTransport;
pub use push::{PushClosed, PushSender, PushTransport};
pub use reliable::{ReliableFetcher, RetryConfig};
pub use settings::{load_settings, load_settings_from_path, ClientSettings, SettingsError};
pub use websocket::{WebSocketConfig, WebSocketTransport};
