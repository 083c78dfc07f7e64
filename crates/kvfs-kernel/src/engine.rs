//! Filesystem engine.
//!
//! Composes the namespace index, attribute store, and content store into the
//! filesystem verbs. Each handler is a short sequence of single-key
//! substrate calls run inside the lock scopes it needs:
//!
//! | handler                  | scopes held                               |
//! |--------------------------|-------------------------------------------|
//! | `mkdir`, `create`        | parent dir                                |
//! | `remove`                 | parent dir, child dir, child ino          |
//! | `readdir`                | dir                                       |
//! | `setattr`, `write`       | ino                                       |
//!
//! The substrate has no multi-key transactions. `mkdir`/`create` write the
//! attribute record before the binding so that a visible binding always has
//! attributes, and undo earlier steps when a later one fails. A crash
//! between steps can still leave records that disagree; readers report that
//! as [`FsError::Inconsistent`].
//!
//! Directory verbs come in two forms. The path form acts on whatever the
//! path is bound to now; the pinned form (used by node handles) also takes
//! the identifier the handle was resolved to and fails with `NotFound` once
//! the path has been rebound to another object.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::alloc::InoAllocator;
use crate::attrs::AttributeStore;
use crate::config::FsConfig;
use crate::content::ContentStore;
use crate::error::{FsError, FsResult};
use crate::lock::LockTable;
use crate::namespace::NamespaceIndex;
use crate::path::{self, NAME_MAX};
use crate::store::KvStore;
use crate::types::{DirEntry, FileAttr, Ino, SetAttr, StatFs};

/// An open file, as tracked by the engine.
///
/// Purely advisory: holding one grants nothing and excludes nobody.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenHandle {
    /// Identifier of the opened file.
    pub ino: Ino,
    /// Handle number, unique for the life of the engine.
    pub fh: u64,
}

/// The namespace and metadata engine.
pub struct Filesystem {
    store: Arc<dyn KvStore>,
    namespace: NamespaceIndex,
    attrs: AttributeStore,
    content: ContentStore,
    alloc: InoAllocator,
    locks: LockTable,
    open_files: DashMap<Ino, u32>,
    next_fh: AtomicU64,
    mounted: AtomicBool,
    block_size: u32,
    max_file_size: u64,
}

impl std::fmt::Debug for Filesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filesystem")
            .field("alloc", &self.alloc)
            .field("open_files", &self.open_files.len())
            .field("mounted", &self.mounted.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Filesystem {
    /// Build an engine over `store`, resuming its identifier allocator.
    pub fn new(store: Arc<dyn KvStore>, config: &FsConfig) -> FsResult<Self> {
        let alloc = InoAllocator::resume(store.clone(), config.ino_batch)?;
        Ok(Self {
            namespace: NamespaceIndex::new(store.clone()),
            attrs: AttributeStore::new(store.clone(), config.block_size),
            content: ContentStore::new(store.clone()),
            store,
            alloc,
            locks: LockTable::new(),
            open_files: DashMap::new(),
            next_fh: AtomicU64::new(1),
            mounted: AtomicBool::new(true),
            block_size: config.block_size,
            max_file_size: config.max_file_size,
        })
    }

    /// The namespace index.
    pub fn namespace(&self) -> &NamespaceIndex {
        &self.namespace
    }

    /// The attribute store.
    pub fn attrs(&self) -> &AttributeStore {
        &self.attrs
    }

    /// The content store.
    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    /// Returns false once [`unmount`](Self::unmount) has run.
    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    /// Stop accepting calls and release the store.
    pub fn unmount(&self) -> FsResult<()> {
        if self.mounted.swap(false, Ordering::AcqRel) {
            tracing::info!(open_files = self.open_files.len(), "unmounting");
            self.store.close()?;
        }
        Ok(())
    }

    fn ensure_mounted(&self) -> FsResult<()> {
        if self.is_mounted() {
            Ok(())
        } else {
            Err(FsError::Unmounted)
        }
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Resolve `parent/name` to its identifier and attributes.
    pub fn lookup(&self, parent: &str, name: &str) -> FsResult<(Ino, FileAttr)> {
        self.lookup_in(parent, None, name)
    }

    #[tracing::instrument(name = "fs.lookup", level = "debug", skip(self))]
    pub(crate) fn lookup_in(
        &self,
        parent: &str,
        pinned: Option<Ino>,
        name: &str,
    ) -> FsResult<(Ino, FileAttr)> {
        self.ensure_mounted()?;
        let name = path::clean_name(name)?;
        let parent = path::normalize(parent);
        let _scope = self.locks.dir(&parent);
        self.check_pinned(&parent, pinned)?;
        let path = path::join(&parent, &name);

        let ino = self
            .namespace
            .resolve(&path)?
            .ok_or_else(|| FsError::not_found(&path))?;
        match self.attrs.find(ino)? {
            Some(attr) => Ok((ino, attr)),
            None => {
                tracing::warn!(%path, %ino, "binding without attributes");
                Err(FsError::not_found(path))
            }
        }
    }

    /// Resolve an absolute path to its identifier and attributes.
    pub fn lookup_path(&self, path: &str) -> FsResult<(Ino, FileAttr)> {
        let path = path::normalize(path);
        match path::split(&path) {
            None => Ok((Ino::ROOT, self.getattr(Ino::ROOT)?)),
            Some((parent, name)) => self.lookup(&parent, &name),
        }
    }

    /// Attributes of `ino`.
    pub fn getattr(&self, ino: Ino) -> FsResult<FileAttr> {
        self.ensure_mounted()?;
        self.attrs.get(ino)
    }

    /// Children of `dir` in creation order.
    ///
    /// A listed child whose binding or attributes are missing is reported as
    /// an inconsistency rather than skipped.
    pub fn readdir(&self, dir: &str) -> FsResult<Vec<DirEntry>> {
        self.readdir_in(dir, None)
    }

    #[tracing::instrument(name = "fs.readdir", level = "debug", skip(self))]
    pub(crate) fn readdir_in(&self, dir: &str, pinned: Option<Ino>) -> FsResult<Vec<DirEntry>> {
        self.ensure_mounted()?;
        let dir = path::normalize(dir);
        let _scope = self.locks.dir(&dir);
        self.check_pinned(&dir, pinned)?;
        self.dir_attr(&dir)?;

        let names = self.namespace.list_children(&dir)?;
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let child = path::join(&dir, &name);
            let ino = self.namespace.resolve(&child)?.ok_or_else(|| {
                tracing::warn!(%child, "listed child has no binding");
                FsError::inconsistent(format!("listed child has no binding: {child}"))
            })?;
            let attr = self.attrs.find(ino)?.ok_or_else(|| {
                tracing::warn!(%child, %ino, "listed child has no attributes");
                FsError::inconsistent(format!("listed child has no attributes: {child} ({ino})"))
            })?;
            entries.push(DirEntry::new(name, ino, attr.kind()));
        }
        tracing::debug!(count = entries.len(), "readdir");
        Ok(entries)
    }

    /// Filesystem statistics.
    pub fn statfs(&self) -> FsResult<StatFs> {
        self.ensure_mounted()?;
        let files = self.alloc.issued() + 1;
        let blocks = u64::MAX / u64::from(self.block_size.max(1));
        Ok(StatFs {
            blocks,
            bfree: blocks,
            bavail: blocks,
            files,
            ffree: u64::MAX - files,
            bsize: self.block_size,
            namelen: NAME_MAX as u32,
            frsize: self.block_size,
        })
    }

    // ========================================================================
    // Structure
    // ========================================================================

    /// Create directory `parent/name`.
    ///
    /// `mode` is stored as given; default permission bits are the caller's
    /// business.
    pub fn mkdir(
        &self,
        parent: &str,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> FsResult<(Ino, FileAttr)> {
        self.mkdir_in(parent, None, name, mode, uid, gid)
    }

    #[tracing::instrument(name = "fs.mkdir", level = "debug", skip(self))]
    pub(crate) fn mkdir_in(
        &self,
        parent: &str,
        pinned: Option<Ino>,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> FsResult<(Ino, FileAttr)> {
        self.make_node(parent, pinned, name, |ino| {
            FileAttr::directory(ino, mode, uid, gid)
        })
        .inspect_err(log_unexpected)
    }

    /// Create regular file `parent/name` and open it.
    ///
    /// The file starts empty; reading it before any write returns no bytes.
    /// Kind bits in `mode` are ignored.
    pub fn create(
        &self,
        parent: &str,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> FsResult<(Ino, FileAttr, OpenHandle)> {
        self.create_in(parent, None, name, mode, uid, gid)
    }

    #[tracing::instrument(name = "fs.create", level = "debug", skip(self))]
    pub(crate) fn create_in(
        &self,
        parent: &str,
        pinned: Option<Ino>,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> FsResult<(Ino, FileAttr, OpenHandle)> {
        let (ino, attr) = self
            .make_node(parent, pinned, name, |ino| FileAttr::file(ino, mode, uid, gid))
            .inspect_err(log_unexpected)?;
        let handle = self.track_open(ino);
        Ok((ino, attr, handle))
    }

    fn make_node(
        &self,
        parent: &str,
        pinned: Option<Ino>,
        name: &str,
        build: impl FnOnce(Ino) -> FileAttr,
    ) -> FsResult<(Ino, FileAttr)> {
        self.ensure_mounted()?;
        let name = path::clean_name(name)?;
        let parent = path::normalize(parent);
        let _scope = self.locks.dir(&parent);

        self.check_pinned(&parent, pinned)?;
        self.dir_attr(&parent)?;
        let path = path::join(&parent, &name);
        if self.namespace.resolve(&path)?.is_some() {
            return Err(FsError::already_exists(path));
        }

        let ino = self.alloc.allocate()?;
        let mut attr = build(ino);
        attr.blksize = self.block_size;

        self.attrs.put(&attr)?;
        if let Err(e) = self.namespace.bind(&path, ino) {
            self.compensate("drop attributes", self.attrs.delete(ino));
            return Err(e);
        }
        if let Err(e) = self.namespace.add_child(&parent, &name) {
            self.compensate("unbind path", self.namespace.unbind(&path));
            self.compensate("drop attributes", self.attrs.delete(ino));
            return Err(e);
        }

        tracing::debug!(%path, %ino, mode = %format!("{:o}", attr.mode), "created");
        Ok((ino, attr))
    }

    /// Remove `parent/name`.
    ///
    /// Fails with `NotFound` before touching anything when the name is not
    /// listed, and with `DirectoryNotEmpty` for a directory with children.
    pub fn remove(&self, parent: &str, name: &str) -> FsResult<()> {
        self.remove_in(parent, None, name)
    }

    #[tracing::instrument(name = "fs.remove", level = "debug", skip(self))]
    pub(crate) fn remove_in(&self, parent: &str, pinned: Option<Ino>, name: &str) -> FsResult<()> {
        self.ensure_mounted()?;
        let name = path::clean_name(name)?;
        let parent = path::normalize(parent);
        let _parent_scope = self.locks.dir(&parent);
        self.check_pinned(&parent, pinned)?;

        let path = path::join(&parent, &name);
        if !self.namespace.list_children(&parent)?.contains(&name) {
            return Err(FsError::not_found(path));
        }

        let _child_scope = self.locks.dir(&path);
        let ino = self.namespace.resolve(&path)?.ok_or_else(|| {
            tracing::warn!(%path, "listed child has no binding");
            FsError::inconsistent(format!("listed child has no binding: {path}"))
        })?;
        let _ino_scope = self.locks.ino(ino);

        let attr = self.attrs.find(ino)?;
        let is_dir = attr.as_ref().is_some_and(FileAttr::is_dir);
        if is_dir && !self.namespace.list_children(&path)?.is_empty() {
            return Err(FsError::directory_not_empty(path));
        }
        if attr.is_none() {
            tracing::warn!(%path, %ino, "removing binding without attributes");
        }

        self.unlink(&parent, &name, &path, ino, is_dir)
            .inspect_err(log_unexpected)?;
        tracing::debug!(%path, %ino, "removed");
        Ok(())
    }

    fn unlink(&self, parent: &str, name: &str, path: &str, ino: Ino, is_dir: bool) -> FsResult<()> {
        self.namespace.remove_child(parent, name)?;
        self.namespace.unbind(path)?;
        self.attrs.delete(ino)?;
        if is_dir {
            self.namespace.delete_listing(path)
        } else {
            self.content.delete(ino)
        }
    }

    /// Merge the set fields of `set` into the attributes of `ino`.
    ///
    /// The modify time is always refreshed. Setting `size` on a regular file
    /// truncates or zero-extends its content to match, up to the configured
    /// maximum file size.
    #[tracing::instrument(name = "fs.setattr", level = "debug", skip(self))]
    pub fn setattr(&self, ino: Ino, set: &SetAttr) -> FsResult<FileAttr> {
        self.ensure_mounted()?;
        if ino.is_root() {
            return Err(FsError::invalid_argument("root attributes are fixed"));
        }
        let _scope = self.locks.ino(ino);
        let mut attr = self.attrs.get(ino)?;

        if let Some(size) = set.size {
            if !attr.is_file() {
                return Err(FsError::is_a_directory(format!("ino {ino}")));
            }
            let len = self.checked_len(ino, size)?;
            let mut data = self.content.find(ino)?.unwrap_or_default();
            if data.len() != len {
                data.resize(len, 0);
                self.content.write(ino, &data)?;
            }
        }

        set.apply(&mut attr);
        self.attrs.put(&attr)?;
        Ok(attr)
    }

    // ========================================================================
    // File content
    // ========================================================================

    /// Open file `ino`.
    #[tracing::instrument(name = "fs.open", level = "debug", skip(self))]
    pub fn open(&self, ino: Ino) -> FsResult<OpenHandle> {
        self.ensure_mounted()?;
        self.file_attr(ino)?;
        Ok(self.track_open(ino))
    }

    /// Whole current content of the file behind `handle`.
    #[tracing::instrument(name = "fs.read", level = "debug", skip(self))]
    pub fn read(&self, handle: &OpenHandle) -> FsResult<Vec<u8>> {
        self.ensure_mounted()?;
        self.file_attr(handle.ino)?;
        Ok(self.content.find(handle.ino)?.unwrap_or_default())
    }

    /// Replace the content of the file behind `handle` with `data`.
    ///
    /// Returns the number of bytes written, which is always `data.len()`.
    #[tracing::instrument(name = "fs.write", level = "debug", skip(self, data), fields(len = data.len()))]
    pub fn write(&self, handle: &OpenHandle, data: &[u8]) -> FsResult<usize> {
        self.ensure_mounted()?;
        let _scope = self.locks.ino(handle.ino);
        let attr = self.file_attr(handle.ino)?;
        self.checked_len(handle.ino, data.len() as u64)?;
        self.store_content(attr, data)?;
        Ok(data.len())
    }

    /// Write `data` at `offset` into the file behind `handle`.
    ///
    /// Built as read, splice, write back under the file's scope. A gap past
    /// the current end is zero-filled. Fails with `FileTooLarge` when the
    /// write would end past the maximum file size.
    #[tracing::instrument(name = "fs.splice_write", level = "debug", skip(self, data), fields(len = data.len()))]
    pub fn splice_write(&self, handle: &OpenHandle, offset: u64, data: &[u8]) -> FsResult<usize> {
        self.ensure_mounted()?;
        let _scope = self.locks.ino(handle.ino);
        let attr = self.file_attr(handle.ino)?;

        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| FsError::file_too_large(format!("ino {}: offset {offset}", handle.ino)))?;
        let end = self.checked_len(handle.ino, end)?;
        let start = end - data.len();

        let mut content = self.content.find(handle.ino)?.unwrap_or_default();
        if end > content.len() {
            content.resize(end, 0);
        }
        content[start..end].copy_from_slice(data);

        self.store_content(attr, &content)?;
        Ok(data.len())
    }

    /// Flush the file behind `handle`. Content is durable after every
    /// write, so there is nothing to do.
    pub fn flush(&self, handle: &OpenHandle) -> FsResult<()> {
        self.ensure_mounted()?;
        tracing::debug!(ino = %handle.ino, fh = handle.fh, "flush");
        Ok(())
    }

    /// Drop the bookkeeping for `handle`.
    pub fn release(&self, handle: &OpenHandle) -> FsResult<()> {
        tracing::debug!(ino = %handle.ino, fh = handle.fh, "release");
        self.open_files
            .remove_if_mut(&handle.ino, |_, count| {
                *count = count.saturating_sub(1);
                *count == 0
            });
        Ok(())
    }

    /// Number of open handles on `ino`.
    pub fn open_count(&self, ino: Ino) -> u32 {
        self.open_files.get(&ino).map(|c| *c).unwrap_or(0)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn track_open(&self, ino: Ino) -> OpenHandle {
        *self.open_files.entry(ino).or_insert(0) += 1;
        OpenHandle {
            ino,
            fh: self.next_fh.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Content first, then size, so the recorded size never runs ahead of
    /// content that was not stored.
    fn store_content(&self, mut attr: FileAttr, data: &[u8]) -> FsResult<()> {
        self.content
            .write(attr.ino, data)
            .and_then(|()| {
                attr.set_size(data.len() as u64);
                attr.touch();
                self.attrs.put(&attr)
            })
            .inspect_err(log_unexpected)
    }

    /// Content length `len` as an in-memory size, refusing anything past the
    /// maximum file size.
    fn checked_len(&self, ino: Ino, len: u64) -> FsResult<usize> {
        if len > self.max_file_size {
            return Err(FsError::file_too_large(format!(
                "ino {ino}: {len} bytes exceeds {}",
                self.max_file_size
            )));
        }
        usize::try_from(len)
            .map_err(|_| FsError::file_too_large(format!("ino {ino}: {len} bytes")))
    }

    /// Fails with `NotFound` when `dir` is no longer bound to `pinned`.
    fn check_pinned(&self, dir: &str, pinned: Option<Ino>) -> FsResult<()> {
        let Some(pinned) = pinned else {
            return Ok(());
        };
        match self.namespace.resolve(dir)? {
            Some(ino) if ino == pinned => Ok(()),
            _ => Err(FsError::not_found(format!("{dir} (ino {pinned})"))),
        }
    }

    /// Attributes of an existing directory path.
    fn dir_attr(&self, dir: &str) -> FsResult<FileAttr> {
        let ino = self.namespace.lookup(dir)?;
        let attr = self.attrs.find(ino)?.ok_or_else(|| {
            tracing::warn!(dir, %ino, "bound directory has no attributes");
            FsError::inconsistent(format!("bound directory has no attributes: {dir} ({ino})"))
        })?;
        if !attr.is_dir() {
            return Err(FsError::not_a_directory(dir));
        }
        Ok(attr)
    }

    /// Attributes of an existing regular file.
    fn file_attr(&self, ino: Ino) -> FsResult<FileAttr> {
        let attr = self.attrs.get(ino)?;
        if attr.is_dir() {
            return Err(FsError::is_a_directory(format!("ino {ino}")));
        }
        Ok(attr)
    }

    fn compensate(&self, step: &str, result: FsResult<()>) {
        match result {
            Ok(()) => tracing::warn!(step, "rolled back partial mutation"),
            Err(e) => tracing::warn!(step, error = %e, "rollback failed, records left behind"),
        }
    }
}

fn log_unexpected(e: &FsError) {
    if !e.is_expected() {
        tracing::error!(error = %e, "handler failed");
    }
}

impl Drop for Filesystem {
    fn drop(&mut self) {
        if let Err(e) = self.unmount() {
            tracing::error!(error = %e, "unmount on drop failed");
        }
    }
}
