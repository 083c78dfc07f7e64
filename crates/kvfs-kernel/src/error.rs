//! Filesystem error types.

use std::io;
use thiserror::Error;

use crate::store::StoreError;

/// Filesystem error type.
///
/// `NotFound`, `AlreadyExists` and `InvalidArgument` are ordinary outcomes a
/// transport replies with. `Inconsistent` means the records of one object
/// disagree with each other, usually because a multi-key mutation was cut
/// short; it is never folded into `NotFound`.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path, identifier, or name absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A binding already exists at the path.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Reserved identifier, malformed name or path.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a regular file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory still has children.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Content would grow past the configured maximum file size.
    #[error("file too large: {0}")]
    FileTooLarge(String),

    /// Records disagree: a listing name without a binding, a binding without
    /// attributes, or an undecodable record.
    #[error("inconsistent namespace: {0}")]
    Inconsistent(String),

    /// The key-value substrate failed.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// A record could not be encoded.
    #[error("encode failed: {0}")]
    Codec(#[from] postcard::Error),

    /// The filesystem has been unmounted.
    #[error("filesystem is unmounted")]
    Unmounted,
}

impl FsError {
    /// Create a NotFound error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create a FileTooLarge error.
    pub fn file_too_large(msg: impl Into<String>) -> Self {
        Self::FileTooLarge(msg.into())
    }

    /// Create an Inconsistent error.
    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::Inconsistent(msg.into())
    }

    /// Returns true for outcomes a caller is expected to handle (as opposed
    /// to substrate failures and corruption).
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            FsError::NotFound(_)
                | FsError::AlreadyExists(_)
                | FsError::InvalidArgument(_)
                | FsError::NotADirectory(_)
                | FsError::IsADirectory(_)
                | FsError::DirectoryNotEmpty(_)
                | FsError::FileTooLarge(_)
        )
    }

    /// POSIX errno a transport should answer with.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => 2,           // ENOENT
            FsError::AlreadyExists(_) => 17,     // EEXIST
            FsError::InvalidArgument(_) => 22,   // EINVAL
            FsError::NotADirectory(_) => 20,     // ENOTDIR
            FsError::IsADirectory(_) => 21,      // EISDIR
            FsError::DirectoryNotEmpty(_) => 39, // ENOTEMPTY
            FsError::FileTooLarge(_) => 27,      // EFBIG
            FsError::Unmounted => 107,           // ENOTCONN
            FsError::Inconsistent(_) | FsError::Store(_) | FsError::Codec(_) => 5, // EIO
        }
    }
}

/// Convert FsError to std::io::Error for transport adapters.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            FsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            FsError::InvalidArgument(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            FsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            FsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            FsError::FileTooLarge(msg) => io::Error::new(io::ErrorKind::FileTooLarge, msg),
            FsError::Inconsistent(msg) => {
                io::Error::new(io::ErrorKind::InvalidData, format!("inconsistent: {msg}"))
            }
            FsError::Store(StoreError::Io(e)) => e,
            FsError::Store(e) => io::Error::other(e),
            FsError::Codec(e) => io::Error::new(io::ErrorKind::InvalidData, e),
            FsError::Unmounted => {
                io::Error::new(io::ErrorKind::NotConnected, "filesystem is unmounted")
            }
        }
    }
}

/// Filesystem result type.
pub type FsResult<T> = Result<T, FsError>;
