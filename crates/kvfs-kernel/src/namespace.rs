//! Namespace index: path bindings and child listings.
//!
//! Two record kinds back the tree:
//!
//! - a namespace entry per path, binding it to one identifier
//! - a child listing per directory path, holding immediate child names in
//!   insertion order
//!
//! A name is listed under a directory if and only if `dir/name` is bound.
//! Callers normalize paths and names first; the index compares raw bytes.
//! Keeping both records consistent across a handler is the engine's job.

use std::sync::Arc;

use crate::codec::{decode, encode};
use crate::error::{FsError, FsResult};
use crate::path::{self, ROOT};
use crate::store::{KvStore, PREFIX_INODE, PREFIX_PATH, inode_key, listing_key};
use crate::types::Ino;

/// Path → identifier bindings and per-directory child listings.
#[derive(Clone)]
pub struct NamespaceIndex {
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for NamespaceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceIndex").finish_non_exhaustive()
    }
}

impl NamespaceIndex {
    /// Create an index over `store`.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    // ========================================================================
    // Bindings
    // ========================================================================

    /// Bind `path` to `ino`. Fails if the path is already bound.
    pub fn bind(&self, path: &str, ino: Ino) -> FsResult<()> {
        if path == ROOT {
            return Err(FsError::already_exists(ROOT));
        }
        let key = inode_key(path);
        if self.store.get(&key)?.is_some() {
            return Err(FsError::already_exists(path));
        }
        self.store.put(&key, &encode(&ino)?)?;
        Ok(())
    }

    /// Resolve `path`, reporting absence as `None`. The root always resolves.
    pub fn resolve(&self, path: &str) -> FsResult<Option<Ino>> {
        if path == ROOT {
            return Ok(Some(Ino::ROOT));
        }
        let key = inode_key(path);
        match self.store.get(&key)? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Resolve `path`.
    pub fn lookup(&self, path: &str) -> FsResult<Ino> {
        self.resolve(path)?.ok_or_else(|| FsError::not_found(path))
    }

    /// Drop the binding of `path`.
    pub fn unbind(&self, path: &str) -> FsResult<()> {
        if path == ROOT {
            return Err(FsError::invalid_argument("cannot unbind root"));
        }
        let key = inode_key(path);
        if self.store.get(&key)?.is_none() {
            return Err(FsError::not_found(path));
        }
        self.store.delete(&key)?;
        Ok(())
    }

    // ========================================================================
    // Child listings
    // ========================================================================

    /// Child names of `dir` in insertion order. Empty if it has none.
    pub fn list_children(&self, dir: &str) -> FsResult<Vec<String>> {
        let key = listing_key(dir);
        match self.store.get(&key)? {
            Some(bytes) => decode(&key, &bytes),
            None => Ok(Vec::new()),
        }
    }

    /// Append `name` to the listing of `dir`. Appending a name that is
    /// already listed leaves the listing unchanged.
    pub fn add_child(&self, dir: &str, name: &str) -> FsResult<()> {
        let mut children = self.list_children(dir)?;
        if children.iter().any(|c| c == name) {
            tracing::warn!(dir, name, "child already listed");
            return Ok(());
        }
        children.push(name.to_string());
        self.put_children(dir, &children)
    }

    /// Splice `name` out of the listing of `dir`, keeping the order of the
    /// remaining names.
    pub fn remove_child(&self, dir: &str, name: &str) -> FsResult<()> {
        let mut children = self.list_children(dir)?;
        let idx = children
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| FsError::not_found(path::join(dir, name)))?;
        children.remove(idx);
        self.put_children(dir, &children)
    }

    /// Drop the listing record of `dir` altogether.
    pub fn delete_listing(&self, dir: &str) -> FsResult<()> {
        self.store.delete(&listing_key(dir))?;
        Ok(())
    }

    fn put_children(&self, dir: &str, children: &[String]) -> FsResult<()> {
        let key = listing_key(dir);
        if children.is_empty() {
            // absent and empty read the same
            self.store.delete(&key)?;
        } else {
            self.store.put(&key, &encode(&children)?)?;
        }
        Ok(())
    }

    // ========================================================================
    // Scans
    // ========================================================================

    /// Every binding in the store.
    pub fn all_bindings(&self) -> FsResult<Vec<(String, Ino)>> {
        self.store
            .scan_prefix(PREFIX_INODE.as_bytes())?
            .into_iter()
            .map(|(key, value)| {
                let path = String::from_utf8_lossy(&key[PREFIX_INODE.len()..]).into_owned();
                Ok((path, decode(&key, &value)?))
            })
            .collect()
    }

    /// Every non-empty listing in the store.
    pub fn all_listings(&self) -> FsResult<Vec<(String, Vec<String>)>> {
        self.store
            .scan_prefix(PREFIX_PATH.as_bytes())?
            .into_iter()
            .map(|(key, value)| {
                let dir = String::from_utf8_lossy(&key[PREFIX_PATH.len()..]).into_owned();
                Ok((dir, decode(&key, &value)?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn index() -> NamespaceIndex {
        NamespaceIndex::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_bind_lookup_unbind() {
        let ns = index();
        ns.bind("/docs", Ino::new(2)).unwrap();
        assert_eq!(ns.lookup("/docs").unwrap(), Ino::new(2));

        ns.unbind("/docs").unwrap();
        assert!(matches!(ns.lookup("/docs"), Err(FsError::NotFound(_))));
        assert!(matches!(ns.unbind("/docs"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_bind_collision() {
        let ns = index();
        ns.bind("/x", Ino::new(2)).unwrap();
        assert!(matches!(
            ns.bind("/x", Ino::new(3)),
            Err(FsError::AlreadyExists(_))
        ));
        assert_eq!(ns.lookup("/x").unwrap(), Ino::new(2));
    }

    #[test]
    fn test_root_resolves_without_binding() {
        let ns = index();
        assert_eq!(ns.lookup("/").unwrap(), Ino::ROOT);
        assert!(ns.bind("/", Ino::new(9)).is_err());
    }

    #[test]
    fn test_listing_order_and_splice() {
        let ns = index();
        assert!(ns.list_children("/").unwrap().is_empty());

        for name in ["a", "b", "c", "d"] {
            ns.add_child("/", name).unwrap();
        }
        ns.remove_child("/", "b").unwrap();
        assert_eq!(ns.list_children("/").unwrap(), vec!["a", "c", "d"]);

        assert!(matches!(
            ns.remove_child("/", "b"),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_add_child_is_idempotent() {
        let ns = index();
        ns.add_child("/d", "x").unwrap();
        ns.add_child("/d", "x").unwrap();
        assert_eq!(ns.list_children("/d").unwrap(), vec!["x"]);
    }

    #[test]
    fn test_empty_listing_is_dropped() {
        let ns = index();
        ns.add_child("/d", "x").unwrap();
        ns.remove_child("/d", "x").unwrap();
        assert!(ns.all_listings().unwrap().is_empty());
        assert!(ns.list_children("/d").unwrap().is_empty());
    }

    #[test]
    fn test_scans() {
        let ns = index();
        ns.bind("/a", Ino::new(2)).unwrap();
        ns.bind("/a/b", Ino::new(3)).unwrap();
        ns.add_child("/", "a").unwrap();
        ns.add_child("/a", "b").unwrap();

        let bindings = ns.all_bindings().unwrap();
        assert_eq!(
            bindings,
            vec![("/a".to_string(), Ino::new(2)), ("/a/b".to_string(), Ino::new(3))]
        );
        assert_eq!(ns.all_listings().unwrap().len(), 2);
    }
}
