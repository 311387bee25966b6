pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod message_store;
pub mod policy;
pub mod preferences;
pub mod read_model;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::EngineError;
pub use events::{EngineEvent, SyncTrigger};
pub use health::{ConnectionHealth, HealthState};
pub use message_store::{IngestOutcome, MessageStore, SyncOutcome};
pub use preferences::{LoadedToggles, ToggleStore};
pub use read_model::{ArrivalDecorations, DaySection, Feed, FeedItem, FeedPage};
pub use session::SessionIdentity;
