//! Dispatch coordinator
//!
//! Drives pending artifacts through their remaining stages. A dispatch
//! claims the record, reloads it, runs the next stage, persists the result
//! and repeats until the record is done or a stage fails. Failed records keep
//! their flags and are picked up again by the next dispatch; nothing retries
//! on a timer.
//!
//! Busy flags and upload percentages live in an in-memory mirror. They are
//! never persisted, so a restart resumes every record from its last stable
//! state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use docsync_common::{Error, Result};
use docsync_http::HttpClient;
use docsync_storage::{FileSystem, KeyValueStore};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::domain::entities::PendingArtifact;
use crate::domain::state::{next_stage, NextStage, Stage, StateError};
use crate::pipeline::executors::{run_isolated, PercentCallback, StageError, StageExecutor};
use crate::pipeline::profiles::{ProfileDecoder, UploadProfile};
use crate::pipeline::progress::{ProgressEvent, ProgressSink, ProgressStage};
use crate::repository::PendingRecordStore;

/// Pipeline behavior switches
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Keep registered records until the next `purge_registered` instead of
    /// deleting them when registration succeeds
    pub retain_completed: bool,
}

/// Collaborators a pipeline runs against
#[derive(Clone)]
pub struct PipelineServices {
    pub kv: Arc<dyn KeyValueStore>,
    pub http: Arc<dyn HttpClient>,
    pub files: Arc<dyn FileSystem>,
    pub progress: Arc<dyn ProgressSink>,
}

/// Why a record stopped advancing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub reason: String,
}

/// Live view of one record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactStatus {
    pub busy: bool,
    /// Stage currently running
    pub stage: Option<Stage>,
    /// Last reported upload percentage
    pub percent: Option<u8>,
    /// Most recent failure, cleared when a stage succeeds
    pub last_failure: Option<StageFailure>,
}

/// How a dispatch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The record does not exist (never added, removed or completed)
    Missing,
    /// Another dispatch is running a stage for the record
    Busy,
    /// Every stage succeeded
    Completed,
    /// A stage failed; the record waits for the next dispatch
    Stalled { stage: Stage },
}

/// Result of `add`
pub struct AddedUpload<O> {
    pub record: PendingArtifact<O>,
    /// The dispatch started for the record
    pub dispatch: JoinHandle<DispatchOutcome>,
}

struct CoordinatorInner<P: UploadProfile> {
    profile: Arc<P>,
    store: PendingRecordStore<P::Owner>,
    executor: StageExecutor<P>,
    files: Arc<dyn FileSystem>,
    progress: Arc<dyn ProgressSink>,
    statuses: Mutex<HashMap<String, ArtifactStatus>>,
    options: PipelineOptions,
}

impl<P: UploadProfile> CoordinatorInner<P> {
    fn with_statuses<R>(&self, f: impl FnOnce(&mut HashMap<String, ArtifactStatus>) -> R) -> R {
        let mut statuses = self.statuses.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut statuses)
    }

    fn emit(&self, key: &str, stage: ProgressStage) {
        self.progress
            .emit(ProgressEvent::new(self.profile.name(), key, stage));
    }

    fn emit_percent(&self, key: &str, percent: u8) {
        self.progress
            .emit(ProgressEvent::uploading(self.profile.name(), key, percent));
    }

    /// Record a percentage for a record still being tracked
    fn set_percent(&self, key: &str, percent: u8) -> bool {
        self.with_statuses(|statuses| match statuses.get_mut(key) {
            Some(status) => {
                status.percent = Some(percent);
                true
            }
            None => false,
        })
    }

    fn percent(&self, key: &str) -> Option<u8> {
        self.with_statuses(|statuses| statuses.get(key).and_then(|s| s.percent))
    }

    fn forget(&self, key: &str) {
        self.with_statuses(|statuses| statuses.remove(key));
    }

    fn with_transient(&self, mut record: PendingArtifact<P::Owner>) -> PendingArtifact<P::Owner> {
        let status = self.with_statuses(|statuses| statuses.get(&record.local_path).cloned());
        let status = status.unwrap_or_default();
        record.is_busy = status.busy;
        record.upload_progress_percent = match status.percent {
            Some(percent) => percent,
            None if record.is_uploaded => 100,
            None => 0,
        };
        record
    }
}

/// Claim on a record's busy flag, released on drop
struct BusyGuard<P: UploadProfile> {
    inner: Arc<CoordinatorInner<P>>,
    key: String,
}

impl<P: UploadProfile> BusyGuard<P> {
    fn acquire(inner: &Arc<CoordinatorInner<P>>, key: &str) -> Option<Self> {
        let claimed = inner.with_statuses(|statuses| {
            let status = statuses.entry(key.to_string()).or_default();
            if status.busy {
                false
            } else {
                status.busy = true;
                true
            }
        });

        claimed.then(|| Self {
            inner: inner.clone(),
            key: key.to_string(),
        })
    }
}

impl<P: UploadProfile> Drop for BusyGuard<P> {
    fn drop(&mut self) {
        self.inner.with_statuses(|statuses| {
            if let Some(status) = statuses.get_mut(&self.key) {
                status.busy = false;
                status.stage = None;
            }
        });
    }
}

/// Drives the pending artifacts of one pipeline
pub struct UploadCoordinator<P: UploadProfile> {
    inner: Arc<CoordinatorInner<P>>,
}

impl<P: UploadProfile> Clone for UploadCoordinator<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: UploadProfile> UploadCoordinator<P> {
    pub fn new(profile: P, services: PipelineServices, options: PipelineOptions) -> Self {
        let profile = Arc::new(profile);
        let store = PendingRecordStore::new(services.kv, profile.index_key())
            .with_legacy_decoder(Arc::new(ProfileDecoder(profile.clone())));
        let executor = StageExecutor::new(profile.clone(), services.http, services.files.clone());

        Self {
            inner: Arc::new(CoordinatorInner {
                profile,
                store,
                executor,
                files: services.files,
                progress: services.progress,
                statuses: Mutex::new(HashMap::new()),
                options,
            }),
        }
    }

    #[mutants::skip] // Delegates to the profile
    pub fn name(&self) -> &'static str {
        self.inner.profile.name()
    }

    /// Underlying record store
    pub fn store(&self) -> &PendingRecordStore<P::Owner> {
        &self.inner.store
    }

    /// Every pending record, in index order, with busy and progress filled in
    pub async fn load_all(&self) -> Result<Vec<PendingArtifact<P::Owner>>> {
        let records = self.inner.store.load_all().await?;
        Ok(records
            .into_iter()
            .map(|record| self.inner.with_transient(record))
            .collect())
    }

    /// One pending record with busy and progress filled in
    pub async fn get(&self, key: &str) -> Result<Option<PendingArtifact<P::Owner>>> {
        let record = self.inner.store.get(key).await?;
        Ok(record.map(|record| self.inner.with_transient(record)))
    }

    /// Persist a new pending artifact and start driving it. Adding a path
    /// that is already pending returns the existing record and dispatches it
    /// again.
    pub async fn add(
        &self,
        owner: P::Owner,
        local_path: impl Into<String>,
    ) -> Result<AddedUpload<P::Owner>> {
        let record = PendingArtifact::new(local_path, owner);
        let key = record.local_path.clone();
        if key.trim().is_empty() {
            return Err(Error::Validation("local path must not be empty".to_string()));
        }

        let record = if self.inner.store.insert(&record).await? {
            tracing::info!(pipeline = self.name(), local_path = %key, "Queued pending upload");
            self.inner.emit(&key, ProgressStage::Queued);
            record
        } else {
            tracing::debug!(pipeline = self.name(), local_path = %key, "Upload already pending");
            self.inner
                .store
                .get(&key)
                .await?
                .ok_or_else(|| Error::NotFound(key.clone()))?
        };

        let dispatch = self.spawn_dispatch(&key);
        Ok(AddedUpload {
            record: self.inner.with_transient(record),
            dispatch,
        })
    }

    /// Dispatch a record on its own task
    pub fn spawn_dispatch(&self, key: &str) -> JoinHandle<DispatchOutcome> {
        let coordinator = self.clone();
        let key = key.to_string();
        tokio::spawn(async move { coordinator.dispatch(&key).await })
    }

    /// Advance a record until it is done or a stage fails.
    pub async fn dispatch(&self, key: &str) -> DispatchOutcome {
        loop {
            // Claim first: the record must be read while no other dispatch can advance it
            let Some(guard) = BusyGuard::acquire(&self.inner, key) else {
                tracing::debug!(pipeline = self.name(), local_path = %key, "Stage already running; dispatch skipped");
                return DispatchOutcome::Busy;
            };

            let record = match self.inner.store.get(key).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    tracing::debug!(pipeline = self.name(), local_path = %key, "No pending record; dispatch stopped");
                    self.inner.forget(key);
                    drop(guard);
                    return DispatchOutcome::Missing;
                }
                Err(e) => {
                    tracing::warn!(pipeline = self.name(), local_path = %key, error = %e, error_code = e.error_code(), "Cannot load pending record");
                    return DispatchOutcome::Missing;
                }
            };

            let stage = match next_stage(&record) {
                NextStage::Busy => return DispatchOutcome::Busy,
                NextStage::Done => {
                    self.complete(key).await;
                    drop(guard);
                    return DispatchOutcome::Completed;
                }
                NextStage::Sign => Stage::Sign,
                NextStage::Upload => Stage::Upload,
                NextStage::Register => Stage::Register,
            };

            let result = self.run_stage(stage, record).await;
            drop(guard);

            if let Err(e) = result {
                self.record_failure(key, stage, &e);
                return DispatchOutcome::Stalled { stage };
            }
        }
    }

    async fn run_stage(
        &self,
        stage: Stage,
        record: PendingArtifact<P::Owner>,
    ) -> std::result::Result<(), StageError> {
        let key = record.local_path.clone();
        self.inner.with_statuses(|statuses| {
            if let Some(status) = statuses.get_mut(&key) {
                status.stage = Some(stage);
                if stage == Stage::Upload {
                    status.percent = Some(0);
                }
            }
        });
        tracing::debug!(pipeline = self.name(), local_path = %key, stage = %stage, "Running stage");

        let executor = self.inner.executor.clone();
        let persisted = match stage {
            Stage::Sign => {
                self.inner.emit(&key, ProgressStage::Signing);
                let target =
                    run_isolated(stage, async move { executor.sign(&record).await }).await?;
                self.persist(&key, |r| r.mark_signed(target)).await?
            }
            Stage::Upload => {
                self.inner.emit_percent(&key, 0);
                let on_progress = self.progress_callback(&key);
                run_isolated(stage, async move { executor.upload(&record, on_progress).await })
                    .await?;
                let persisted = self.persist(&key, |r| r.mark_uploaded()).await?;
                if persisted && self.inner.percent(&key) != Some(100) {
                    self.inner.set_percent(&key, 100);
                    self.inner.emit_percent(&key, 100);
                }
                persisted
            }
            Stage::Register => {
                self.inner.emit(&key, ProgressStage::Registering);
                run_isolated(stage, async move { executor.register(&record).await }).await?;
                self.persist(&key, |r| r.mark_registered()).await?
            }
        };

        if persisted {
            self.inner.with_statuses(|statuses| {
                if let Some(status) = statuses.get_mut(&key) {
                    status.last_failure = None;
                }
            });
            tracing::debug!(pipeline = self.name(), local_path = %key, stage = %stage, "Stage succeeded");
        } else {
            tracing::debug!(pipeline = self.name(), local_path = %key, stage = %stage, "Record removed while stage was running; result discarded");
        }
        Ok(())
    }

    /// Apply a stage result to the stored record. `false` when the record
    /// was removed meanwhile.
    async fn persist<F>(&self, key: &str, change: F) -> std::result::Result<bool, StageError>
    where
        F: FnOnce(&mut PendingArtifact<P::Owner>) -> std::result::Result<(), StateError>,
    {
        self.inner
            .store
            .update(key, change)
            .await
            .map(|updated| updated.is_some())
            .map_err(|e| StageError::Storage(e.to_string()))
    }

    fn progress_callback(&self, key: &str) -> PercentCallback {
        let inner = self.inner.clone();
        let key = key.to_string();
        Arc::new(move |percent| {
            if inner.set_percent(&key, percent) {
                inner.emit_percent(&key, percent);
            }
        })
    }

    fn record_failure(&self, key: &str, stage: Stage, error: &StageError) {
        tracing::warn!(
            pipeline = self.name(),
            local_path = %key,
            stage = %stage,
            error = %error,
            "Stage failed; record will retry on next dispatch"
        );
        let reason = error.to_string();
        self.inner.with_statuses(|statuses| {
            if let Some(status) = statuses.get_mut(key) {
                status.last_failure = Some(StageFailure {
                    stage,
                    reason: reason.clone(),
                });
            }
        });
        self.inner.emit(key, ProgressStage::Failed { stage, reason });
    }

    async fn complete(&self, key: &str) {
        self.inner.emit(key, ProgressStage::Done);
        if self.inner.options.retain_completed {
            tracing::info!(pipeline = self.name(), local_path = %key, "Pending upload registered");
            return;
        }

        match self.inner.store.delete(key).await {
            Ok(_) => {
                self.inner.forget(key);
                tracing::info!(pipeline = self.name(), local_path = %key, "Pending upload registered and cleared");
            }
            Err(e) => {
                tracing::warn!(pipeline = self.name(), local_path = %key, error = %e, error_code = e.error_code(), "Cannot clear registered record");
            }
        }
    }

    /// Dispatch every pending record concurrently
    pub async fn dispatch_all(&self) -> Result<Vec<(String, DispatchOutcome)>> {
        let keys: Vec<String> = self
            .inner
            .store
            .load_all()
            .await?
            .into_iter()
            .map(|record| record.local_path)
            .collect();

        let outcomes = futures::future::join_all(keys.iter().map(|key| self.dispatch(key))).await;
        Ok(keys.into_iter().zip(outcomes).collect())
    }

    /// Cancel a pending artifact: forget the record and delete its file.
    /// A stage already in flight finishes but its result is discarded.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let existed = self.inner.store.delete(key).await?;
        self.inner.forget(key);

        match self.inner.files.exists(key).await {
            Ok(true) => {
                if let Err(e) = self.inner.files.delete(key).await {
                    tracing::warn!(pipeline = self.name(), local_path = %key, error = %e, "Cannot delete local file");
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(pipeline = self.name(), local_path = %key, error = %e, "Cannot check local file");
            }
        }

        self.inner.emit(key, ProgressStage::Removed);
        tracing::info!(pipeline = self.name(), local_path = %key, existed, "Removed pending upload");
        Ok(existed)
    }

    /// Sweep registered records left over from an earlier session
    pub async fn purge_registered(&self) -> Result<Vec<String>> {
        let swept = self.inner.store.sweep_registered().await?;
        for key in &swept {
            self.inner.forget(key);
        }
        if !swept.is_empty() {
            tracing::info!(pipeline = self.name(), purged = swept.len(), "Purged registered records");
        }
        Ok(swept)
    }

    /// Startup entry point: migrate, purge, then dispatch everything
    pub async fn resume(&self) -> Result<Vec<(String, DispatchOutcome)>> {
        let migrated = self.inner.store.migrate_legacy().await?;
        let purged = self.purge_registered().await?;
        let outcomes = self.dispatch_all().await?;

        tracing::info!(
            pipeline = self.name(),
            migrated,
            purged = purged.len(),
            dispatched = outcomes.len(),
            "Resumed pending uploads"
        );
        Ok(outcomes)
    }

    /// Live status of a record this process has touched
    pub fn status(&self, key: &str) -> Option<ArtifactStatus> {
        self.inner
            .with_statuses(|statuses| statuses.get(key).cloned())
    }

    /// Live status of every record this process has touched
    pub fn statuses(&self) -> HashMap<String, ArtifactStatus> {
        self.inner.with_statuses(|statuses| statuses.clone())
    }

    /// Drop every pending record of this pipeline (sign-out)
    pub async fn clear(&self) -> Result<usize> {
        let cleared = self.inner.store.clear().await?;
        self.inner.with_statuses(|statuses| statuses.clear());
        tracing::info!(pipeline = self.name(), cleared, "Cleared pending uploads");
        Ok(cleared)
    }
}
