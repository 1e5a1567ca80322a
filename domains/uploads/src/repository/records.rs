//! Pending record repository
//!
//! One key-value entry per record, keyed by the record's local path, plus an
//! index entry holding the ordered list of keys. The two are written
//! separately, so a crash can leave an orphaned record (never surfaced) or a
//! dangling index entry (skipped on load, dropped by the sweep).

use std::collections::HashSet;
use std::sync::Arc;

use docsync_common::{Error, Result};
use docsync_storage::KeyValueStore;
use tokio::sync::Mutex;

use crate::domain::entities::{OwnerContext, PendingArtifact};
use crate::domain::migration::{decode_record, DecodedRecord, LegacyDecoder};
use crate::domain::state::StateError;

pub struct PendingRecordStore<O> {
    kv: Arc<dyn KeyValueStore>,
    index_key: String,
    legacy: Option<Arc<dyn LegacyDecoder<O>>>,
    /// Serialises every read-modify-write of the index or a record
    write_lock: Mutex<()>,
}

impl<O: OwnerContext> PendingRecordStore<O> {
    pub fn new(kv: Arc<dyn KeyValueStore>, index_key: impl Into<String>) -> Self {
        Self {
            kv,
            index_key: index_key.into(),
            legacy: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Read unversioned records through `decoder`
    pub fn with_legacy_decoder(mut self, decoder: Arc<dyn LegacyDecoder<O>>) -> Self {
        self.legacy = Some(decoder);
        self
    }

    pub fn index_key(&self) -> &str {
        &self.index_key
    }

    /// Upsert a record under its local path
    pub async fn put(&self, record: &PendingArtifact<O>) -> Result<()> {
        let value = serde_json::to_string(record)?;
        self.kv.set(&record.local_path, value).await?;
        Ok(())
    }

    /// Read a record; absent, corrupt and unknown-schema records are `None`
    pub async fn get(&self, key: &str) -> Result<Option<PendingArtifact<O>>> {
        Ok(self.decode(key).await?.and_then(DecodedRecord::into_record))
    }

    async fn decode(&self, key: &str) -> Result<Option<DecodedRecord<O>>> {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(None);
        };
        let decoded = decode_record(key, &raw, self.legacy.as_deref());
        if let DecodedRecord::Unreadable(reason) = &decoded {
            tracing::warn!(key = %key, reason = %reason, "Ignoring unreadable pending record");
        }
        Ok(Some(decoded))
    }

    /// Delete a record; removing an absent key is not an error
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.kv.remove(key).await?;
        Ok(())
    }

    /// Ordered keys; a corrupt index reads as empty
    pub async fn index(&self) -> Result<Vec<String>> {
        let Some(raw) = self.kv.get(&self.index_key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(keys) => Ok(keys),
            Err(e) => {
                tracing::warn!(index = %self.index_key, error = %e, "Ignoring unreadable index");
                Ok(Vec::new())
            }
        }
    }

    pub async fn set_index(&self, keys: &[String]) -> Result<()> {
        let value = serde_json::to_string(keys)?;
        self.kv.set(&self.index_key, value).await?;
        Ok(())
    }

    /// Persist and index a new record. Returns `false` without writing when
    /// an indexed record already exists under the same path.
    pub async fn insert(&self, record: &PendingArtifact<O>) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let mut keys = self.index().await?;
        let indexed = keys.iter().any(|k| k == &record.local_path);
        if indexed && self.get(&record.local_path).await?.is_some() {
            return Ok(false);
        }

        self.put(record).await?;
        if !indexed {
            keys.push(record.local_path.clone());
            self.set_index(&keys).await?;
        }
        Ok(true)
    }

    /// Apply `change` to a stored record and persist it. Returns `None`
    /// when the record no longer exists, so a removed record is never
    /// written back.
    pub async fn update<F>(&self, key: &str, change: F) -> Result<Option<PendingArtifact<O>>>
    where
        F: FnOnce(&mut PendingArtifact<O>) -> std::result::Result<(), StateError>,
    {
        let _guard = self.write_lock.lock().await;

        let Some(mut record) = self.get(key).await? else {
            return Ok(None);
        };
        change(&mut record).map_err(|e| Error::Conflict(e.to_string()))?;
        self.put(&record).await?;
        Ok(Some(record))
    }

    /// Remove a record and its index entry. Returns whether either existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let keys = self.index().await?;
        let existed = self.kv.get(key).await?.is_some() || keys.iter().any(|k| k == key);

        self.remove(key).await?;
        let remaining: Vec<String> = keys.into_iter().filter(|k| k != key).collect();
        self.set_index(&remaining).await?;
        Ok(existed)
    }

    /// Every resolvable record, in index order, without duplicates
    pub async fn load_all(&self) -> Result<Vec<PendingArtifact<O>>> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for key in self.index().await? {
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Some(record) = self.get(&key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Remove registered records and dangling index entries. Returns the
    /// keys of the registered records removed.
    pub async fn sweep_registered(&self) -> Result<Vec<String>> {
        let _guard = self.write_lock.lock().await;

        let keys = self.index().await?;
        let mut seen = HashSet::new();
        let mut remaining = Vec::with_capacity(keys.len());
        let mut swept = Vec::new();

        for key in &keys {
            if !seen.insert(key.as_str()) {
                continue;
            }
            match self.get(key).await? {
                Some(record) if record.is_registered => {
                    self.remove(key).await?;
                    swept.push(key.clone());
                }
                Some(_) => remaining.push(key.clone()),
                None => {
                    tracing::debug!(key = %key, "Dropping dangling index entry");
                }
            }
        }

        if remaining != keys {
            self.set_index(&remaining).await?;
        }
        Ok(swept)
    }

    /// Rewrite every indexed legacy record in the current schema. Returns
    /// how many were migrated.
    pub async fn migrate_legacy(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let mut migrated = 0;
        for key in self.index().await? {
            if let Some(DecodedRecord::Legacy(record)) = self.decode(&key).await? {
                let value = serde_json::to_string(&record)?;
                self.kv.set(&key, value).await?;
                migrated += 1;
            }
        }

        if migrated > 0 {
            tracing::info!(index = %self.index_key, migrated, "Migrated legacy pending records");
        }
        Ok(migrated)
    }

    /// Remove every indexed record and the index itself. Returns how many
    /// keys were indexed.
    pub async fn clear(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let keys = self.index().await?;
        for key in &keys {
            self.remove(key).await?;
        }
        self.kv.remove(&self.index_key).await?;
        Ok(keys.len())
    }
}
