use alertsync_core::{Category, Role, StorageError};
use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid time window: start {start} is not before end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("no signed-in identity")]
    NotSignedIn,

    #[error("category {category} is not visible to role {role}")]
    CategoryHidden { category: Category, role: Role },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
