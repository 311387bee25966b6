use alertsync_core::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("database schema v{found} is newer than supported v{supported}")]
    SchemaTooNew { found: u32, supported: u32 },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<StoreError> for StorageError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Database(msg) => StorageError::Backend(msg),
            StoreError::Io(msg) => StorageError::Io(msg),
            other @ StoreError::SchemaTooNew { .. } => StorageError::Backend(other.to_string()),
        }
    }
}
