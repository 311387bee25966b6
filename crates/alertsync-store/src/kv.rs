use chrono::Utc;
use tracing::instrument;

use alertsync_core::{DurableStore, StorageError};

use crate::database::Database;
use crate::error::StoreError;

/// `DurableStore` backed by the `kv_entries` table.
pub struct SqliteKvStore {
    db: Database,
}

impl SqliteKvStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Keys currently stored, in lexical order.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM kv_entries ORDER BY key")?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

impl DurableStore for SqliteKvStore {
    #[instrument(skip(self))]
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let value = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT value FROM kv_entries WHERE key = ?1")?;
            let mut rows = stmt.query([key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get::<_, Vec<u8>>(0)?)),
                None => Ok(None),
            }
        })?;
        Ok(value)
    }

    #[instrument(skip(self, value), fields(bytes = value.len()))]
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key, value, now],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM kv_entries WHERE key = ?1", [key])?;
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteKvStore {
        SqliteKvStore::new(Database::in_memory().unwrap())
    }

    #[test]
    fn get_missing_key_is_none() {
        assert!(store().get("messages").unwrap().is_none());
    }

    #[test]
    fn set_then_get() {
        let kv = store();
        kv.set("messages", b"[]").unwrap();
        assert_eq!(kv.get("messages").unwrap().as_deref(), Some(&b"[]"[..]));
    }

    #[test]
    fn set_overwrites() {
        let kv = store();
        kv.set("messageFilters", b"{\"info\":true}").unwrap();
        kv.set("messageFilters", b"{\"info\":false}").unwrap();
        assert_eq!(
            kv.get("messageFilters").unwrap().as_deref(),
            Some(&b"{\"info\":false}"[..])
        );
        assert_eq!(kv.keys().unwrap(), vec!["messageFilters".to_string()]);
    }

    #[test]
    fn remove_deletes_and_is_idempotent() {
        let kv = store();
        kv.set("messages", b"[1]").unwrap();
        kv.remove("messages").unwrap();
        assert!(kv.get("messages").unwrap().is_none());
        kv.remove("messages").unwrap();
    }

    #[test]
    fn survives_reopen() {
        let dir = std::env::temp_dir().join(format!("alertsync-kv-test-{}", uuid::Uuid::now_v7()));
        let path = dir.join("kv.db");
        {
            let kv = SqliteKvStore::new(Database::open(&path).unwrap());
            kv.set("notificationSettings", b"{}").unwrap();
        }
        let kv = SqliteKvStore::new(Database::open(&path).unwrap());
        assert_eq!(kv.get("notificationSettings").unwrap().as_deref(), Some(&b"{}"[..]));
        drop(kv);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
