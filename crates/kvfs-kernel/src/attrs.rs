//! Attribute store: one metadata record per identifier.
//!
//! The root directory's record is synthesized on every read and never
//! written, so the store needs no bootstrap step.

use std::sync::Arc;

use crate::codec::{decode, encode};
use crate::error::{FsError, FsResult};
use crate::store::{KvStore, PREFIX_METADATA, metadata_key};
use crate::types::{FileAttr, Ino};

/// Per-identifier attribute records.
#[derive(Clone)]
pub struct AttributeStore {
    store: Arc<dyn KvStore>,
    block_size: u32,
}

impl std::fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeStore")
            .field("block_size", &self.block_size)
            .finish_non_exhaustive()
    }
}

impl AttributeStore {
    /// Create a store over `store`; `block_size` is reported for the root.
    pub fn new(store: Arc<dyn KvStore>, block_size: u32) -> Self {
        Self { store, block_size }
    }

    /// Write the record of `attr.ino`, replacing any previous one.
    pub fn put(&self, attr: &FileAttr) -> FsResult<()> {
        if attr.ino.is_none() {
            return Err(FsError::invalid_argument("ino 0 is reserved"));
        }
        if attr.ino.is_root() {
            return Err(FsError::invalid_argument("root attributes are not stored"));
        }
        self.store.put(&metadata_key(attr.ino), &encode(attr)?)?;
        Ok(())
    }

    /// Fetch the record of `ino`, reporting absence as `None`.
    pub fn find(&self, ino: Ino) -> FsResult<Option<FileAttr>> {
        if ino.is_none() {
            return Err(FsError::invalid_argument("ino 0 is reserved"));
        }
        if ino.is_root() {
            let mut attr = FileAttr::root();
            attr.blksize = self.block_size;
            return Ok(Some(attr));
        }
        let key = metadata_key(ino);
        match self.store.get(&key)? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Fetch the record of `ino`.
    pub fn get(&self, ino: Ino) -> FsResult<FileAttr> {
        self.find(ino)?
            .ok_or_else(|| FsError::not_found(format!("ino {ino}")))
    }

    /// Drop the record of `ino`. Dropping an absent record is not an error.
    pub fn delete(&self, ino: Ino) -> FsResult<()> {
        if ino.is_root() || ino.is_none() {
            return Err(FsError::invalid_argument(format!("ino {ino} is reserved")));
        }
        self.store.delete(&metadata_key(ino))?;
        Ok(())
    }

    /// Every stored record.
    pub fn all(&self) -> FsResult<Vec<FileAttr>> {
        self.store
            .scan_prefix(PREFIX_METADATA.as_bytes())?
            .into_iter()
            .map(|(key, value)| decode(&key, &value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn attrs() -> AttributeStore {
        AttributeStore::new(Arc::new(MemoryStore::new()), 4096)
    }

    #[test]
    fn test_put_get_delete() {
        let store = attrs();
        let attr = FileAttr::file(Ino::new(5), 0o644, 1, 1);
        store.put(&attr).unwrap();
        assert_eq!(store.get(Ino::new(5)).unwrap(), attr);

        store.delete(Ino::new(5)).unwrap();
        assert!(matches!(store.get(Ino::new(5)), Err(FsError::NotFound(_))));
        assert_eq!(store.find(Ino::new(5)).unwrap(), None);
    }

    #[test]
    fn test_root_is_synthesized() {
        let store = attrs();
        let root = store.get(Ino::ROOT).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.blksize, 4096);
        assert!(store.put(&root).is_err());
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn test_zero_ino_rejected() {
        let store = attrs();
        let attr = FileAttr::file(Ino::NONE, 0o644, 0, 0);
        assert!(matches!(store.put(&attr), Err(FsError::InvalidArgument(_))));
        assert!(matches!(store.get(Ino::NONE), Err(FsError::InvalidArgument(_))));
    }
}
