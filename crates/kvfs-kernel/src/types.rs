//! Core filesystem types.
//!
//! Attribute records are serialized with postcard into the substrate; the
//! encoding is internal and not a compatibility surface.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Mask of the object-kind bits in a mode.
pub const S_IFMT: u32 = 0o170000;
/// Directory kind bits.
pub const S_IFDIR: u32 = 0o040000;
/// Regular file kind bits.
pub const S_IFREG: u32 = 0o100000;
/// Mask of the permission bits (including setuid/setgid/sticky).
pub const PERM_MASK: u32 = 0o7777;

/// Unit in which `blocks` is counted.
const BLOCK_UNIT: u64 = 512;

/// A filesystem object identifier.
///
/// `0` is the "no identifier" sentinel and `1` is the root directory; both
/// are reserved and never handed out by the allocator.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ino(u64);

impl Ino {
    /// The "no identifier" sentinel.
    pub const NONE: Ino = Ino(0);
    /// The root directory.
    pub const ROOT: Ino = Ino(1);

    /// Wrap a raw identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns true for the root directory.
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }

    /// Returns true for the `0` sentinel.
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Display for Ino {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Ino {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ino({})", self.0)
    }
}

impl From<u64> for Ino {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Object kind, derived from the mode bits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum FileKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Anything else (device, fifo, socket, symlink); stored but not
    /// interpreted.
    Other,
}

impl FileKind {
    /// Derive the kind from a full mode.
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFDIR => FileKind::Directory,
            S_IFREG => FileKind::File,
            _ => FileKind::Other,
        }
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileKind::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileKind::Directory)
    }
}

/// Per-identifier attribute record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAttr {
    /// Identifier this record describes.
    pub ino: Ino,
    /// Size in bytes.
    pub size: u64,
    /// Allocated 512-byte blocks.
    pub blocks: u64,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last status change time.
    pub ctime: SystemTime,
    /// Creation time.
    pub crtime: SystemTime,
    /// Kind bits plus permission bits.
    pub mode: u32,
    /// Hard link count. Always 1: each path owns exactly one identifier.
    pub nlink: u32,
    /// Owning user.
    pub uid: u32,
    /// Owning group.
    pub gid: u32,
    /// Device identifier.
    pub rdev: u32,
    /// Flag bits.
    pub flags: u32,
    /// Preferred I/O block size.
    pub blksize: u32,
}

impl FileAttr {
    /// Attributes for a new directory.
    pub fn directory(ino: Ino, perm: u32, uid: u32, gid: u32) -> Self {
        Self::new(ino, S_IFDIR | (perm & PERM_MASK), uid, gid)
    }

    /// Attributes for a new, empty regular file. Kind bits in `perm` are
    /// ignored.
    pub fn file(ino: Ino, perm: u32, uid: u32, gid: u32) -> Self {
        Self::new(ino, S_IFREG | (perm & PERM_MASK), uid, gid)
    }

    fn new(ino: Ino, mode: u32, uid: u32, gid: u32) -> Self {
        let now = SystemTime::now();
        Self {
            ino,
            size: 0,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            mode,
            nlink: 1,
            uid,
            gid,
            rdev: 0,
            flags: 0,
            blksize: 0,
        }
    }

    /// Synthesized attributes of the root directory. Never stored.
    pub fn root() -> Self {
        let mut attr = Self::new(Ino::ROOT, S_IFDIR | 0o777, 0, 0);
        attr.size = 4;
        attr
    }

    /// Object kind.
    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }

    /// Permission bits only.
    pub fn perm(&self) -> u32 {
        self.mode & PERM_MASK
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind().is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind().is_dir()
    }

    /// Set the size and recompute block accounting.
    pub fn set_size(&mut self, size: u64) {
        self.size = size;
        self.blocks = size.div_ceil(BLOCK_UNIT);
    }

    /// Refresh modify and change time.
    pub fn touch(&mut self) {
        let now = SystemTime::now();
        self.mtime = now;
        self.ctime = now;
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Identifier of the entry.
    pub ino: Ino,
    /// Entry type.
    pub kind: FileKind,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, ino: Ino, kind: FileKind) -> Self {
        Self {
            name: name.into(),
            ino,
            kind,
        }
    }
}

/// Attributes to set (for setattr operation).
///
/// Only fields that are `Some` are merged; everything else keeps its stored
/// value. There is no modification-time field: every setattr stamps the
/// current time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetAttr {
    /// New permission bits (kind bits are ignored).
    pub mode: Option<u32>,
    /// New size (truncate/extend).
    pub size: Option<u64>,
    /// New access time.
    pub atime: Option<SystemTime>,
    /// New creation time.
    pub crtime: Option<SystemTime>,
    /// New user ID.
    pub uid: Option<u32>,
    /// New group ID.
    pub gid: Option<u32>,
    /// New flag bits.
    pub flags: Option<u32>,
}

impl SetAttr {
    /// Create a new empty SetAttr.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the permission bits.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the access time.
    pub fn with_atime(mut self, atime: SystemTime) -> Self {
        self.atime = Some(atime);
        self
    }

    /// Set the owner.
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }

    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge the set fields into `attr`, then refresh modify/change time.
    pub fn apply(&self, attr: &mut FileAttr) {
        if let Some(mode) = self.mode {
            attr.mode = (attr.mode & S_IFMT) | (mode & PERM_MASK);
        }
        if let Some(size) = self.size {
            attr.set_size(size);
        }
        if let Some(atime) = self.atime {
            attr.atime = atime;
        }
        if let Some(crtime) = self.crtime {
            attr.crtime = crtime;
        }
        if let Some(uid) = self.uid {
            attr.uid = uid;
        }
        if let Some(gid) = self.gid {
            attr.gid = gid;
        }
        if let Some(flags) = self.flags {
            attr.flags = flags;
        }
        attr.touch();
    }
}

/// Filesystem statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatFs {
    /// Total blocks.
    pub blocks: u64,
    /// Free blocks.
    pub bfree: u64,
    /// Available blocks (to non-root).
    pub bavail: u64,
    /// Identifiers handed out so far, plus root.
    pub files: u64,
    /// Free identifiers.
    pub ffree: u64,
    /// Block size.
    pub bsize: u32,
    /// Maximum name length.
    pub namelen: u32,
    /// Fragment size.
    pub frsize: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kind_from_mode() {
        assert_eq!(FileKind::from_mode(S_IFDIR | 0o755), FileKind::Directory);
        assert_eq!(FileKind::from_mode(S_IFREG | 0o644), FileKind::File);
        assert_eq!(FileKind::from_mode(0o020000), FileKind::Other);
    }

    #[test]
    fn test_attr_constructors() {
        let dir = FileAttr::directory(Ino::new(7), 0o755, 1000, 100);
        assert!(dir.is_dir());
        assert_eq!(dir.perm(), 0o755);
        assert_eq!(dir.nlink, 1);
        assert_eq!(dir.uid, 1000);

        let file = FileAttr::file(Ino::new(8), 0o644, 0, 0);
        assert!(file.is_file());
        assert_eq!(file.size, 0);
        assert_eq!(file.mode, S_IFREG | 0o644);

        let file = FileAttr::file(Ino::new(9), S_IFDIR | 0o600, 0, 0);
        assert!(file.is_file());
        assert_eq!(file.mode, S_IFREG | 0o600);

        let root = FileAttr::root();
        assert!(root.is_dir());
        assert!(root.ino.is_root());
    }

    #[test]
    fn test_set_size_counts_blocks() {
        let mut attr = FileAttr::file(Ino::new(2), 0o644, 0, 0);
        attr.set_size(1);
        assert_eq!(attr.blocks, 1);
        attr.set_size(1024);
        assert_eq!(attr.blocks, 2);
        attr.set_size(0);
        assert_eq!(attr.blocks, 0);
    }

    #[test]
    fn test_setattr_merges_only_set_fields() {
        let mut attr = FileAttr::file(Ino::new(2), 0o644, 10, 20);
        let before = attr.mtime - Duration::from_secs(60);
        attr.mtime = before;

        SetAttr::new().with_mode(0o600).apply(&mut attr);
        assert_eq!(attr.mode, S_IFREG | 0o600);
        assert_eq!(attr.uid, 10);
        assert_eq!(attr.gid, 20);
        assert!(attr.mtime > before);
    }

    #[test]
    fn test_setattr_mode_keeps_kind() {
        let mut attr = FileAttr::directory(Ino::new(3), 0o755, 0, 0);
        SetAttr::new().with_mode(S_IFREG | 0o700).apply(&mut attr);
        assert!(attr.is_dir());
        assert_eq!(attr.perm(), 0o700);
    }

    #[test]
    fn test_attr_postcard_roundtrip() {
        let attr = FileAttr::file(Ino::new(99), 0o640, 1, 2);
        let bytes = postcard::to_allocvec(&attr).unwrap();
        let back: FileAttr = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(attr, back);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(FileKind::Directory.to_string(), "directory");
        assert_eq!("file".parse::<FileKind>().unwrap(), FileKind::File);
    }
}
