pub mod errors;
pub mod identity;
pub mod ids;
pub mod message;
pub mod storage;
pub mod toggles;
pub mod transport;
pub mod wire;

pub use errors::{FetchError, StorageError};
pub use identity::{Identity, IdentityProvider, Role};
pub use ids::MessageId;
pub use message::{Category, Message};
pub use storage::DurableStore;
pub use toggles::{CategoryToggles, StoredToggles};
pub use transport::{HistoryFetcher, LiveEvent, LiveTransport, PreferenceSink, TimeWindow};
pub use wire::{decode_live_frame, LiveFrame, WireError};
