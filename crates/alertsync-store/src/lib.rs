pub mod database;
pub mod error;
pub mod kv;
pub mod memory;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use kv::SqliteKvStore;
pub use memory::MemoryStore;
