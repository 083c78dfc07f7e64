//! Mount configuration.
//!
//! Loaded from TOML; every field has a default so an empty file (or no file)
//! is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::alloc::DEFAULT_BATCH;

/// Default permission bits for directories created without any.
pub const DEFAULT_DIR_MODE: u32 = 0o755;
/// Default permission bits for files created without any.
pub const DEFAULT_FILE_MODE: u32 = 0o644;
/// Default preferred I/O block size.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;
/// Default cap on a single file's content, 1 GiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1 << 30;

/// Config loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Could not read the file.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Could not parse the file.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Configuration of one mounted namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Directory the namespace is presented at.
    pub mount_point: PathBuf,
    /// Directory holding the backing key-value database.
    pub store_dir: PathBuf,
    /// Permission bits applied to mkdir requests that carry none.
    pub default_dir_mode: u32,
    /// Permission bits applied to create requests that carry none.
    pub default_file_mode: u32,
    /// Preferred I/O block size reported in attributes.
    pub block_size: u32,
    /// Identifiers reserved per persisted allocator update.
    pub ino_batch: u64,
    /// Largest content a file may hold. Content is one blob held in memory
    /// while it is rewritten.
    pub max_file_size: u64,
    /// Owner used when a request carries no credentials.
    pub uid: u32,
    /// Group used when a request carries no credentials.
    pub gid: u32,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from("/tmp/kvfs"),
            store_dir: Self::default_store_dir(),
            default_dir_mode: DEFAULT_DIR_MODE,
            default_file_mode: DEFAULT_FILE_MODE,
            block_size: DEFAULT_BLOCK_SIZE,
            ino_batch: DEFAULT_BATCH,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            uid: 0,
            gid: 0,
        }
    }
}

impl FsConfig {
    /// `$XDG_DATA_HOME/kvfs` (or the platform equivalent).
    pub fn default_store_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("kvfs")
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Set the mount point.
    pub fn with_mount_point(mut self, path: impl Into<PathBuf>) -> Self {
        self.mount_point = path.into();
        self
    }

    /// Set the backing-store directory.
    pub fn with_store_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_dir = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        let config = FsConfig::from_toml("").unwrap();
        assert_eq!(config, FsConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = FsConfig::from_toml(
            r#"
            store_dir = "/data/kvfs"
            default_dir_mode = 0o700
            ino_batch = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/data/kvfs"));
        assert_eq!(config.default_dir_mode, 0o700);
        assert_eq!(config.default_file_mode, DEFAULT_FILE_MODE);
        assert_eq!(config.ino_batch, 16);
    }

    #[test]
    fn test_load_reports_path() {
        let err = FsConfig::load("/nonexistent/kvfs.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/kvfs.toml"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kvfs.toml");
        std::fs::write(&path, "block_size = 512\nuid = 1000\nmax_file_size = 65536\n").unwrap();
        let config = FsConfig::load(&path).unwrap();
        assert_eq!(config.block_size, 512);
        assert_eq!(config.max_file_size, 65536);
        assert_eq!(config.uid, 1000);
    }
}
