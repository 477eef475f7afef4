//! Storage abstraction trait

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage abstraction over a root directory addressed by relative keys.
///
/// ffmpeg reads and writes files directly, so the backend must also be able to hand
/// out a filesystem path for a key.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `data` at `key`, creating parent directories and replacing any existing file.
    async fn write(&self, key: &str, data: Vec<u8>) -> StorageResult<()>;

    async fn read(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Delete the file at `key`. Deleting a missing file is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Recursively delete the directory at `key`. A missing directory is not an error.
    async fn delete_dir(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Filesystem path for `key`, without touching the filesystem beyond validation.
    fn local_path(&self, key: &str) -> StorageResult<PathBuf>;

    /// Create the directory at `key` (and its parents) and return its filesystem path.
    async fn prepare_dir(&self, key: &str) -> StorageResult<PathBuf>;
}
