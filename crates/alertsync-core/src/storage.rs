use crate::errors::StorageError;

/// Durable keys owned by the sync core.
pub mod keys {
    pub const MESSAGES: &str = "messages";
    pub const NOTIFICATION_SETTINGS: &str = "notificationSettings";
    pub const MESSAGE_FILTERS: &str = "messageFilters";
}

/// Key/value persistence that survives process restarts.
pub trait DurableStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}
