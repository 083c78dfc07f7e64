//! Content store: one whole-file blob per identifier.
//!
//! There is no range addressing. A write replaces the blob; offset writes are
//! built by the engine as read, splice, write back.

use std::sync::Arc;

use crate::error::{FsError, FsResult};
use crate::store::{KvStore, PREFIX_DATA, data_key};
use crate::types::Ino;

/// Per-identifier content blobs.
#[derive(Clone)]
pub struct ContentStore {
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore").finish_non_exhaustive()
    }
}

impl ContentStore {
    /// Create a store over `store`.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Read the blob of `ino`, reporting absence as `None`.
    pub fn find(&self, ino: Ino) -> FsResult<Option<Vec<u8>>> {
        Ok(self.store.get(&data_key(ino))?)
    }

    /// Read the blob of `ino`.
    pub fn read(&self, ino: Ino) -> FsResult<Vec<u8>> {
        self.find(ino)?
            .ok_or_else(|| FsError::not_found(format!("content of ino {ino}")))
    }

    /// Replace the blob of `ino`.
    pub fn write(&self, ino: Ino, data: &[u8]) -> FsResult<()> {
        if ino.is_none() || ino.is_root() {
            return Err(FsError::invalid_argument(format!("ino {ino} has no content")));
        }
        self.store.put(&data_key(ino), data)?;
        Ok(())
    }

    /// Drop the blob of `ino`. Dropping an absent blob is not an error.
    pub fn delete(&self, ino: Ino) -> FsResult<()> {
        self.store.delete(&data_key(ino))?;
        Ok(())
    }

    /// Identifiers that currently have a blob, with blob lengths.
    pub fn all(&self) -> FsResult<Vec<(Ino, usize)>> {
        let mut out = Vec::new();
        for (key, value) in self.store.scan_prefix(PREFIX_DATA.as_bytes())? {
            let suffix = String::from_utf8_lossy(&key[PREFIX_DATA.len()..]).into_owned();
            let raw: u64 = suffix.parse().map_err(|_| {
                FsError::inconsistent(format!("content key with bad ino: {suffix:?}"))
            })?;
            out.push((Ino::new(raw), value.len()));
        }
        Ok(out)
    }
}
