//! Mock File System Implementation
//!
//! Holds captured files in memory for test assertions.
//! Thread-safe via `Arc<Mutex<>>`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{FileSystem, StorageError};

/// Mock file system that records deletions.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

impl MockFileSystem {
    /// Create an empty mock file system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a file.
    pub fn add_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .expect("files lock poisoned — prior test panicked")
            .insert(path.to_string(), contents.into());
    }

    /// Whether a file is currently present.
    pub fn contains(&self, path: &str) -> bool {
        self.files
            .lock()
            .expect("files lock poisoned — prior test panicked")
            .contains_key(path)
    }

    /// Return every path deleted so far, in order.
    pub fn deleted_paths(&self) -> Vec<String> {
        self.deleted
            .lock()
            .expect("deleted lock poisoned — prior test panicked")
            .clone()
    }

    fn lock_error<T>(err: std::sync::PoisonError<T>) -> StorageError {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("mock file system lock poisoned: {err}"),
        ))
    }
}

#[async_trait::async_trait]
impl FileSystem for MockFileSystem {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let files = self.files.lock().map_err(Self::lock_error)?;
        Ok(files.contains_key(path))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let removed = self
            .files
            .lock()
            .map_err(Self::lock_error)?
            .remove(path);
        match removed {
            Some(_) => {
                tracing::debug!(path = %path, "Mock file system: deleted file");
                self.deleted
                    .lock()
                    .map_err(Self::lock_error)?
                    .push(path.to_string());
                Ok(())
            }
            None => Err(StorageError::NotFound(path.to_string())),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let files = self.files.lock().map_err(Self::lock_error)?;
        files
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}
