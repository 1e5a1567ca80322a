//! File-backed key-value store
//!
//! One file per key inside a single directory. File names are the SHA-256
//! digest of the key, so arbitrary keys (including absolute paths) are safe.
//! Writes go to a temporary sibling first and are renamed into place, a
//! reader never observes a half-written value.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use docsync_common::key_digest;

use crate::{KeyValueStore, StorageError};

const VALUE_EXTENSION: &str = "kv";

#[derive(Debug)]
pub struct FileKeyValueStore {
    dir: PathBuf,
    write_seq: AtomicU64,
}

impl FileKeyValueStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_seq: AtomicU64::new(0),
        })
    }

    /// Directory holding the value files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", key_digest(key), VALUE_EXTENSION))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            ".{}.{}.{}.tmp",
            key_digest(key),
            std::process::id(),
            seq
        ))
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match tokio::fs::read(self.value_path(key)).await {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(value) => Ok(Some(value)),
                Err(_) => {
                    // Undecodable bytes read as an opaque, unparseable payload
                    tracing::warn!(key = %key, "Key-value entry is not valid UTF-8");
                    Ok(Some(String::new()))
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let temp = self.temp_path(key);
        tokio::fs::write(&temp, value.as_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&temp, self.value_path(key)).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.value_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
