//! # kvfs-kernel
//!
//! A hierarchical filesystem persisted in a flat key-value store.
//!
//! The store only knows single-key `get`/`put`/`delete`. The tree is kept
//! in four record families on top of it:
//! - namespace entries binding each path to an identifier
//! - child listings holding each directory's names in creation order
//! - attribute records per identifier
//! - one whole-file content blob per regular file
//!
//! [`Filesystem`] composes them into the usual verbs (lookup, readdir,
//! mkdir, create, remove, setattr, open, read, write, flush, release) and
//! serializes the multi-key handlers with per-directory and per-identifier
//! scopes. [`Mount`] ties an engine to a backing store on disk, and the
//! handles in [`node`] are what a transport adapter drives.

pub mod alloc;
pub mod attrs;
mod codec;
pub mod config;
pub mod content;
pub mod engine;
pub mod error;
pub mod fsck;
pub mod lock;
pub mod mount;
pub mod namespace;
pub mod node;
pub mod path;
pub mod store;
pub mod types;

pub use config::{ConfigError, FsConfig};
pub use engine::{Filesystem, OpenHandle};
pub use error::{FsError, FsResult};
pub use fsck::{FsckIssue, FsckReport, fsck};
pub use mount::Mount;
pub use node::{DefaultModes, DirHandle, FileHandle, Node, OpenFile};
pub use store::{KvStore, MemoryStore, SqliteStore, StoreError, StoreResult};
pub use types::{DirEntry, FileAttr, FileKind, Ino, SetAttr, StatFs};
