//! Node handles.
//!
//! The surface a transport adapter drives: directory and file handles that
//! carry their path, and open files that release themselves on drop.
//! Default permission bits are applied here, not in the engine.
//!
//! A directory handle stays pinned to the identifier it was resolved to.
//! Once its path is removed and recreated, calls through the old handle
//! fail with `NotFound` instead of reaching the new directory.

use std::sync::Arc;

use crate::engine::{Filesystem, OpenHandle};
use crate::error::FsResult;
use crate::path;
use crate::types::{DirEntry, FileAttr, FileKind, Ino, PERM_MASK, SetAttr};

/// Permission bits used when a request carries none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultModes {
    /// Permission bits for new directories.
    pub dir: u32,
    /// Permission bits for new regular files.
    pub file: u32,
}

impl DefaultModes {
    fn dir_mode(&self, mode: u32) -> u32 {
        if mode & PERM_MASK == 0 { mode | self.dir } else { mode }
    }

    fn file_mode(&self, mode: u32) -> u32 {
        if mode & PERM_MASK == 0 { mode | self.file } else { mode }
    }
}

/// A resolved object.
#[derive(Debug, Clone)]
pub enum Node {
    /// A directory.
    Dir(DirHandle),
    /// A regular file, or any other non-directory kind.
    File(FileHandle),
}

impl Node {
    fn from_attr(fs: Arc<Filesystem>, modes: DefaultModes, path: String, attr: &FileAttr) -> Self {
        match attr.kind() {
            FileKind::Directory => Node::Dir(DirHandle {
                fs,
                modes,
                ino: attr.ino,
                path,
            }),
            _ => Node::File(FileHandle {
                fs,
                ino: attr.ino,
                path,
            }),
        }
    }

    /// Identifier of the object.
    pub fn ino(&self) -> Ino {
        match self {
            Node::Dir(d) => d.ino,
            Node::File(f) => f.ino,
        }
    }

    /// Absolute path the object was resolved at.
    pub fn path(&self) -> &str {
        match self {
            Node::Dir(d) => &d.path,
            Node::File(f) => &f.path,
        }
    }

    /// Current attributes.
    pub fn attr(&self) -> FsResult<FileAttr> {
        match self {
            Node::Dir(d) => d.attr(),
            Node::File(f) => f.attr(),
        }
    }

    /// Merge `set` into the attributes.
    pub fn setattr(&self, set: &SetAttr) -> FsResult<FileAttr> {
        match self {
            Node::Dir(d) => d.setattr(set),
            Node::File(f) => f.setattr(set),
        }
    }

    /// The directory handle, if this is one.
    pub fn as_dir(&self) -> Option<&DirHandle> {
        match self {
            Node::Dir(d) => Some(d),
            Node::File(_) => None,
        }
    }

    /// The file handle, if this is one.
    pub fn as_file(&self) -> Option<&FileHandle> {
        match self {
            Node::File(f) => Some(f),
            Node::Dir(_) => None,
        }
    }
}

/// Handle on a directory.
#[derive(Clone)]
pub struct DirHandle {
    fs: Arc<Filesystem>,
    modes: DefaultModes,
    ino: Ino,
    path: String,
}

impl std::fmt::Debug for DirHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirHandle")
            .field("ino", &self.ino)
            .field("path", &self.path)
            .finish()
    }
}

impl DirHandle {
    /// Handle on the root directory.
    pub fn root(fs: Arc<Filesystem>, modes: DefaultModes) -> Self {
        Self {
            fs,
            modes,
            ino: Ino::ROOT,
            path: path::ROOT.to_string(),
        }
    }

    /// Identifier this handle is pinned to.
    pub fn ino(&self) -> Ino {
        self.ino
    }

    /// Absolute path of the handle.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current attributes.
    pub fn attr(&self) -> FsResult<FileAttr> {
        self.fs.getattr(self.ino)
    }

    /// Merge `set` into the attributes.
    pub fn setattr(&self, set: &SetAttr) -> FsResult<FileAttr> {
        self.fs.setattr(self.ino, set)
    }

    /// Resolve a child by name.
    pub fn lookup(&self, name: &str) -> FsResult<Node> {
        let (_, attr) = self.fs.lookup_in(&self.path, Some(self.ino), name)?;
        let path = path::join(&self.path, &path::clean_name(name)?);
        Ok(Node::from_attr(self.fs.clone(), self.modes, path, &attr))
    }

    /// Children, preceded by `.` and `..`.
    pub fn readdir(&self) -> FsResult<Vec<DirEntry>> {
        let children = self.fs.readdir_in(&self.path, Some(self.ino))?;
        let parent = match path::split(&self.path) {
            Some((parent, _)) => self.fs.namespace().lookup(&parent)?,
            None => Ino::ROOT,
        };

        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push(DirEntry::new(".", self.ino, FileKind::Directory));
        entries.push(DirEntry::new("..", parent, FileKind::Directory));
        entries.extend(children);
        Ok(entries)
    }

    /// Create a subdirectory. A mode without permission bits gets the
    /// configured default.
    pub fn mkdir(&self, name: &str, mode: u32, uid: u32, gid: u32) -> FsResult<DirHandle> {
        let mode = self.modes.dir_mode(mode);
        let (ino, _) = self
            .fs
            .mkdir_in(&self.path, Some(self.ino), name, mode, uid, gid)?;
        Ok(DirHandle {
            fs: self.fs.clone(),
            modes: self.modes,
            ino,
            path: path::join(&self.path, &path::clean_name(name)?),
        })
    }

    /// Create and open a regular file. A mode without permission bits gets
    /// the configured default.
    pub fn create(
        &self,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> FsResult<(FileHandle, OpenFile)> {
        let mode = self.modes.file_mode(mode);
        let (ino, _, handle) = self
            .fs
            .create_in(&self.path, Some(self.ino), name, mode, uid, gid)?;
        let open = OpenFile::new(self.fs.clone(), handle);
        let file = FileHandle {
            fs: self.fs.clone(),
            ino,
            path: path::join(&self.path, &path::clean_name(name)?),
        };
        Ok((file, open))
    }

    /// Remove a child file or empty subdirectory.
    pub fn remove(&self, name: &str) -> FsResult<()> {
        self.fs.remove_in(&self.path, Some(self.ino), name)
    }
}

/// Handle on a regular file.
#[derive(Clone)]
pub struct FileHandle {
    fs: Arc<Filesystem>,
    ino: Ino,
    path: String,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("ino", &self.ino)
            .field("path", &self.path)
            .finish()
    }
}

impl FileHandle {
    /// Identifier this handle is pinned to.
    pub fn ino(&self) -> Ino {
        self.ino
    }

    /// Absolute path of the handle.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current attributes.
    pub fn attr(&self) -> FsResult<FileAttr> {
        self.fs.getattr(self.ino)
    }

    /// Merge `set` into the attributes.
    pub fn setattr(&self, set: &SetAttr) -> FsResult<FileAttr> {
        self.fs.setattr(self.ino, set)
    }

    /// Open the file.
    pub fn open(&self) -> FsResult<OpenFile> {
        let handle = self.fs.open(self.ino)?;
        Ok(OpenFile::new(self.fs.clone(), handle))
    }
}

/// An open regular file. Released on drop if not released explicitly.
pub struct OpenFile {
    fs: Arc<Filesystem>,
    handle: OpenHandle,
    released: bool,
}

impl std::fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenFile")
            .field("handle", &self.handle)
            .field("released", &self.released)
            .finish()
    }
}

impl OpenFile {
    fn new(fs: Arc<Filesystem>, handle: OpenHandle) -> Self {
        Self {
            fs,
            handle,
            released: false,
        }
    }

    /// Identifier of the open file.
    pub fn ino(&self) -> Ino {
        self.handle.ino
    }

    /// Handle number.
    pub fn fh(&self) -> u64 {
        self.handle.fh
    }

    /// Whole current content.
    pub fn read(&self) -> FsResult<Vec<u8>> {
        self.fs.read(&self.handle)
    }

    /// Up to `size` bytes starting at `offset`. Empty past the end.
    pub fn read_at(&self, offset: u64, size: usize) -> FsResult<Vec<u8>> {
        let data = self.fs.read(&self.handle)?;
        let start = usize::try_from(offset).map_or(data.len(), |o| o.min(data.len()));
        let end = start.saturating_add(size).min(data.len());
        Ok(data[start..end].to_vec())
    }

    /// Replace the whole content.
    pub fn write(&self, data: &[u8]) -> FsResult<usize> {
        self.fs.write(&self.handle, data)
    }

    /// Write `data` at `offset`, keeping the bytes around it.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> FsResult<usize> {
        self.fs.splice_write(&self.handle, offset, data)
    }

    /// Flush pending writes. Writes are durable on return, so this only
    /// checks the mount.
    pub fn flush(&self) -> FsResult<()> {
        self.fs.flush(&self.handle)
    }

    /// Release the handle. Later calls are no-ops.
    pub fn release(&mut self) -> FsResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.fs.release(&self.handle)
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(ino = %self.handle.ino, error = %e, "release on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FsConfig;
    use crate::error::FsError;
    use crate::store::MemoryStore;

    fn root() -> DirHandle {
        let fs = Filesystem::new(Arc::new(MemoryStore::new()), &FsConfig::default()).unwrap();
        DirHandle::root(
            Arc::new(fs),
            DefaultModes {
                dir: 0o755,
                file: 0o644,
            },
        )
    }

    #[test]
    fn test_default_modes_applied() {
        let root = root();
        let dir = root.mkdir("d", 0, 0, 0).unwrap();
        assert_eq!(dir.attr().unwrap().perm(), 0o755);

        let (file, _open) = root.create("f", 0, 0, 0).unwrap();
        assert_eq!(file.attr().unwrap().perm(), 0o644);

        let dir = root.mkdir("private", 0o700, 0, 0).unwrap();
        assert_eq!(dir.attr().unwrap().perm(), 0o700);
    }

    #[test]
    fn test_readdir_has_dot_entries() {
        let root = root();
        let docs = root.mkdir("docs", 0o755, 0, 0).unwrap();
        let (file, _open) = docs.create("a.txt", 0o644, 0, 0).unwrap();

        let entries = docs.readdir().unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".", "..", "a.txt"]);
        assert_eq!(entries[0].ino, docs.ino());
        assert_eq!(entries[1].ino, Ino::ROOT);
        assert_eq!(entries[2].ino, file.ino());

        let entries = root.readdir().unwrap();
        assert_eq!(entries[1].ino, Ino::ROOT);
    }

    #[test]
    fn test_lookup_returns_typed_nodes() {
        let root = root();
        let docs = root.mkdir("docs", 0o755, 0, 0).unwrap();
        docs.create("a.txt", 0o644, 0, 0).unwrap();

        let node = root.lookup("docs").unwrap();
        let dir = node.as_dir().unwrap();
        assert_eq!(dir.path(), "/docs");

        let node = dir.lookup("a.txt").unwrap();
        assert_eq!(node.path(), "/docs/a.txt");
        assert!(node.as_file().is_some());
        assert!(node.attr().unwrap().is_file());
    }

    #[test]
    fn test_open_file_io() {
        let root = root();
        let (file, mut open) = root.create("f", 0o644, 0, 0).unwrap();
        open.write(b"hello world").unwrap();
        assert_eq!(open.read_at(6, 5).unwrap(), b"world");
        assert_eq!(open.read_at(6, 100).unwrap(), b"world");
        assert!(open.read_at(100, 5).unwrap().is_empty());

        open.write_at(0, b"HELLO").unwrap();
        open.flush().unwrap();
        assert_eq!(open.read().unwrap(), b"HELLO world");
        assert_eq!(file.attr().unwrap().size, 11);

        open.release().unwrap();
        open.release().unwrap();
    }

    #[test]
    fn test_drop_releases() {
        let root = root();
        let (file, open) = root.create("f", 0o644, 0, 0).unwrap();
        let second = file.open().unwrap();
        assert_eq!(root.fs.open_count(file.ino()), 2);
        drop(open);
        drop(second);
        assert_eq!(root.fs.open_count(file.ino()), 0);
    }

    #[test]
    fn test_open_directory_fails() {
        let root = root();
        root.mkdir("d", 0o755, 0, 0).unwrap();
        let node = root.lookup("d").unwrap();
        assert!(node.as_file().is_none());
        assert!(matches!(
            root.fs.open(node.ino()),
            Err(FsError::IsADirectory(_))
        ));
    }

    #[test]
    fn test_stale_dir_handle_rejected() {
        let root = root();
        let stale = root.mkdir("d", 0o755, 0, 0).unwrap();
        root.remove("d").unwrap();
        let fresh = root.mkdir("d", 0o755, 0, 0).unwrap();
        assert_ne!(stale.ino(), fresh.ino());

        assert!(matches!(stale.mkdir("x", 0, 0, 0), Err(FsError::NotFound(_))));
        assert!(matches!(stale.create("y", 0, 0, 0), Err(FsError::NotFound(_))));
        assert!(matches!(stale.readdir(), Err(FsError::NotFound(_))));
        assert!(matches!(stale.lookup("x"), Err(FsError::NotFound(_))));
        assert!(matches!(stale.attr(), Err(FsError::NotFound(_))));

        fresh.mkdir("z", 0, 0, 0).unwrap();
        assert!(matches!(stale.remove("z"), Err(FsError::NotFound(_))));
        let names: Vec<_> = fresh.readdir().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec![".", "..", "z"]);
    }

    #[test]
    fn test_read_at_huge_offset_is_empty() {
        let root = root();
        let (_, open) = root.create("f", 0o644, 0, 0).unwrap();
        open.write(b"abc").unwrap();
        assert!(open.read_at(u64::MAX, 4).unwrap().is_empty());
        assert!(matches!(
            open.write_at(u64::MAX, b"x"),
            Err(FsError::FileTooLarge(_))
        ));
    }

    #[test]
    fn test_remove_through_handle() {
        let root = root();
        root.create("f", 0o644, 0, 0).unwrap();
        root.remove("f").unwrap();
        assert!(matches!(root.lookup("f"), Err(FsError::NotFound(_))));
    }
}
