//! Key-value substrate.
//!
//! Every filesystem fact lives in a flat byte-keyed store. Records of
//! different kinds share one keyspace and are kept apart by a fixed prefix:
//!
//! | prefix            | suffix | value                        |
//! |-------------------|--------|------------------------------|
//! | `kvfs_inode_`     | path   | identifier (namespace entry) |
//! | `kvfs_metadata_`  | ino    | attribute record             |
//! | `kvfs_path_`      | path   | child listing                |
//! | `kvfs_data_`      | ino    | raw content                  |
//!
//! The substrate offers no multi-key transactions.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::io;
use thiserror::Error;

use crate::types::Ino;

/// Namespace entry prefix (path → ino).
pub const PREFIX_INODE: &str = "kvfs_inode_";
/// Attribute record prefix (ino → attr).
pub const PREFIX_METADATA: &str = "kvfs_metadata_";
/// Child listing prefix (dir path → names).
pub const PREFIX_PATH: &str = "kvfs_path_";
/// Content blob prefix (ino → bytes).
pub const PREFIX_DATA: &str = "kvfs_data_";
/// Allocator high-water mark.
pub const KEY_NEXT_INO: &str = "kvfs_meta_next_ino";

/// Substrate error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

/// Substrate result type.
pub type StoreResult<T> = Result<T, StoreError>;

/// A byte-keyed store with single-key operations.
///
/// `get` reports absence as `Ok(None)`; `delete` of an absent key succeeds.
pub trait KvStore: Send + Sync {
    /// Fetch the value stored under `key`.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> StoreResult<()>;

    /// All pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Release the store. Later calls fail with [`StoreError::Closed`].
    fn close(&self) -> StoreResult<()>;
}

/// Namespace entry key for a path.
pub fn inode_key(path: &str) -> Vec<u8> {
    format!("{PREFIX_INODE}{path}").into_bytes()
}

/// Attribute record key for an identifier.
pub fn metadata_key(ino: Ino) -> Vec<u8> {
    format!("{PREFIX_METADATA}{ino}").into_bytes()
}

/// Child listing key for a directory path.
pub fn listing_key(path: &str) -> Vec<u8> {
    format!("{PREFIX_PATH}{path}").into_bytes()
}

/// Content blob key for an identifier.
pub fn data_key(ino: Ino) -> Vec<u8> {
    format!("{PREFIX_DATA}{ino}").into_bytes()
}
