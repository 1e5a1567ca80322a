//! Local disk file system access

use std::io::ErrorKind;

use crate::{FileSystem, StorageError};

/// Captured-file access backed by `tokio::fs`.
///
/// Paths may be given with a `file://` scheme prefix, as camera and picker
/// integrations usually hand them out.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

fn strip_scheme(path: &str) -> &str {
    path.strip_prefix("file://").unwrap_or(path)
}

fn map_not_found(path: &str, err: std::io::Error) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(path.to_string())
    } else {
        StorageError::Io(err)
    }
}

#[async_trait::async_trait]
impl FileSystem for LocalFileSystem {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(strip_scheme(path)).await?)
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        tokio::fs::remove_file(strip_scheme(path))
            .await
            .map_err(|e| map_not_found(path, e))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        tokio::fs::read(strip_scheme(path))
            .await
            .map_err(|e| map_not_found(path, e))
    }
}
