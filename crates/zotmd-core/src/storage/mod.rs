//! Sync state store
//!
//! One SQLite database per library holding a record per synced item plus
//! the library cursor. Every mutation runs in its own transaction.

pub mod error;
pub mod schema;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use schema::{migrate, SCHEMA_VERSION};
pub use store::{StoreStats, SyncStateStore};
