//! Mount lifecycle.
//!
//! A mount validates its two locations, opens the backing store, and hands
//! out the root handle. Closing it stops the engine and releases the store.

use std::path::Path;
use std::sync::Arc;

use crate::config::FsConfig;
use crate::engine::Filesystem;
use crate::error::{FsError, FsResult};
use crate::node::{DefaultModes, DirHandle, Node};
use crate::path;
use crate::store::{KvStore, MemoryStore, SqliteStore, StoreError};

/// A mounted namespace.
#[derive(Debug)]
pub struct Mount {
    fs: Arc<Filesystem>,
    config: FsConfig,
}

impl Mount {
    /// Mount the SQLite-backed store under `config.store_dir`.
    ///
    /// Missing directories are created; a location that exists but is not a
    /// directory fails the mount before any request is served.
    pub fn open(config: &FsConfig) -> FsResult<Self> {
        check_dir(&config.mount_point)?;
        check_dir(&config.store_dir)?;
        let store = SqliteStore::open_dir(&config.store_dir)?;
        Self::with_store(Arc::new(store), config)
    }

    /// Mount a fresh in-memory store.
    pub fn in_memory(config: &FsConfig) -> FsResult<Self> {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    /// Mount an already-open store.
    pub fn with_store(store: Arc<dyn KvStore>, config: &FsConfig) -> FsResult<Self> {
        let fs = Filesystem::new(store, config)?;
        tracing::info!(
            mount_point = %config.mount_point.display(),
            store_dir = %config.store_dir.display(),
            "mounted"
        );
        Ok(Self {
            fs: Arc::new(fs),
            config: config.clone(),
        })
    }

    /// Handle on the root directory.
    pub fn root(&self) -> DirHandle {
        DirHandle::root(
            self.fs.clone(),
            DefaultModes {
                dir: self.config.default_dir_mode,
                file: self.config.default_file_mode,
            },
        )
    }

    /// Walk from the root to `path`.
    pub fn node(&self, path: &str) -> FsResult<Node> {
        let path = path::normalize(path);
        let mut node = Node::Dir(self.root());
        for name in path.split('/').filter(|c| !c.is_empty()) {
            let dir = match &node {
                Node::Dir(dir) => dir,
                Node::File(file) => return Err(FsError::not_a_directory(file.path())),
            };
            node = dir.lookup(name)?;
        }
        Ok(node)
    }

    /// Walk from the root to directory `path`.
    pub fn dir(&self, path: &str) -> FsResult<DirHandle> {
        match self.node(path)? {
            Node::Dir(dir) => Ok(dir),
            Node::File(file) => Err(FsError::not_a_directory(file.path())),
        }
    }

    pub fn engine(&self) -> &Arc<Filesystem> {
        &self.fs
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// Stop serving and release the backing store. Handles still held by
    /// callers fail with `Unmounted` from here on.
    pub fn close(&self) -> FsResult<()> {
        self.fs.unmount()?;
        tracing::info!(mount_point = %self.config.mount_point.display(), "unmounted");
        Ok(())
    }
}

/// Create `path` if missing; reject it if it exists as something else.
fn check_dir(path: &Path) -> FsResult<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(FsError::not_a_directory(path.display().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "creating directory");
            std::fs::create_dir_all(path).map_err(StoreError::from)?;
            Ok(())
        }
        Err(e) => Err(StoreError::from(e).into()),
    }
}
