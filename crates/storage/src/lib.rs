//! Docsync Device Storage
//!
//! Provides the device-local collaborators the upload pipeline persists through:
//! - Key-value persistence (file-backed for production, in-memory for tests)
//! - File system access for captured files (local disk, in-memory mock)
//! - Configurable provider and storage directory

pub mod file;
pub mod fs;
pub mod memory;
pub mod mock;

use std::path::PathBuf;

use thiserror::Error;

pub use file::FileKeyValueStore;
pub use fs::LocalFileSystem;
pub use memory::MemoryKeyValueStore;
pub use mock::MockFileSystem;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage configuration error: {0}")]
    Configuration(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    NotFound(String),
}

impl From<StorageError> for docsync_common::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(path) => docsync_common::Error::NotFound(path),
            other => docsync_common::Error::Storage(other.to_string()),
        }
    }
}

/// Asynchronous string key-value persistence.
///
/// Values are opaque strings; callers own the encoding. Removing an absent key
/// is not an error.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Upsert the value stored under `key`.
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Delete the value stored under `key`.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Access to captured files on the device.
#[async_trait::async_trait]
pub trait FileSystem: Send + Sync {
    /// Whether a file exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Delete the file at `path`. Deleting a missing file is an error.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Read the whole file at `path`.
    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Storage provider (file, memory)
    pub provider: String,
    /// Directory for the file provider
    pub dir: PathBuf,
}

impl StorageConfig {
    /// Create storage config from environment variables
    pub fn from_env() -> Result<Self, StorageError> {
        let provider = std::env::var("STORAGE_PROVIDER").unwrap_or_else(|_| "file".to_string());
        let dir = std::env::var("DOCSYNC_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.docsync"));

        Ok(Self { provider, dir })
    }
}

/// Factory for creating KeyValueStore implementations
pub struct KeyValueStoreFactory;

impl KeyValueStoreFactory {
    /// Create a key-value store based on configuration
    pub async fn create(config: StorageConfig) -> Result<Box<dyn KeyValueStore>, StorageError> {
        match config.provider.as_str() {
            "file" => {
                tracing::info!(dir = %config.dir.display(), "Creating file key-value store");
                let store = FileKeyValueStore::open(&config.dir).await?;
                Ok(Box::new(store))
            }
            "memory" => {
                tracing::info!("Creating in-memory key-value store");
                Ok(Box::new(MemoryKeyValueStore::new()))
            }
            provider => Err(StorageError::Configuration(format!(
                "Unknown storage provider: {}. Supported providers: file, memory",
                provider
            ))),
        }
    }
}
