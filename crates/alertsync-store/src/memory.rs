use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use alertsync_core::{DurableStore, StorageError};

/// Process-local `DurableStore`. Used by tests and by embedders that
/// provide their own persistence outside the core.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`remove` fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StorageError::Io("write rejected".into()));
        }
        Ok(())
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.check_writable()?;
        self.entries.lock().insert(key.to_string(), value.to_vec());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        self.entries.lock().remove(key);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_remove() {
        let store = MemoryStore::new();
        store.set("k", b"v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
        store.remove("k").unwrap();
        assert!(!store.contains("k"));
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn failing_writes_leave_state_untouched() {
        let store = MemoryStore::new();
        store.set("k", b"old").unwrap();
        store.set_fail_writes(true);
        assert!(store.set("k", b"new").is_err());
        assert!(store.remove("k").is_err());
        assert_eq!(store.get("k").unwrap(), Some(b"old".to_vec()));

        store.set_fail_writes(false);
        store.set("k", b"new").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"new".to_vec()));
    }
}
