//! Remote stage executors
//!
//! Each executor performs one remote call for a record and reports the
//! outcome. Executors never touch the record store; the coordinator persists
//! their results. Every failure, including a panic inside the stage, comes
//! back as a `StageError`.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use docsync_http::{HttpClient, HttpRequest, HttpResponse, UploadProgress};
use docsync_storage::FileSystem;
use thiserror::Error;

use crate::domain::entities::{PendingArtifact, SignedTarget};
use crate::domain::state::{Stage, StateError};
use crate::pipeline::profiles::UploadProfile;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("{stage} request failed: {message}")]
    Request { stage: Stage, message: String },

    #[error("{stage} rejected with status {status}: {message}")]
    Rejected {
        stage: Stage,
        status: u16,
        message: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Cannot read local file: {0}")]
    File(String),

    #[error("{0} stage panicked")]
    Panicked(Stage),

    #[error("No signed target for {0}")]
    MissingTarget(String),

    #[error("Cannot persist stage result: {0}")]
    Storage(String),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Callback receiving upload percentages
pub type PercentCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Percentage of a transfer, rounded to the nearest whole percent
pub fn upload_percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = ((sent as f64 / total as f64) * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

/// Runs the three remote stages for one profile
pub struct StageExecutor<P: UploadProfile> {
    profile: Arc<P>,
    http: Arc<dyn HttpClient>,
    files: Arc<dyn FileSystem>,
}

impl<P: UploadProfile> Clone for StageExecutor<P> {
    fn clone(&self) -> Self {
        Self {
            profile: self.profile.clone(),
            http: self.http.clone(),
            files: self.files.clone(),
        }
    }
}

impl<P: UploadProfile> StageExecutor<P> {
    pub fn new(profile: Arc<P>, http: Arc<dyn HttpClient>, files: Arc<dyn FileSystem>) -> Self {
        Self {
            profile,
            http,
            files,
        }
    }

    /// Obtain a signed upload target
    pub async fn sign(&self, record: &PendingArtifact<P::Owner>) -> Result<SignedTarget, StageError> {
        let request = self
            .profile
            .sign_request(record.file_name(), &record.owner);
        let response = self.send(Stage::Sign, request).await?;
        if !response.is_success() {
            return Err(rejected(Stage::Sign, response));
        }
        self.profile.parse_signed_target(&response.data)
    }

    /// Transfer the file to its signed target. `on_progress` receives
    /// non-decreasing percentages.
    pub async fn upload(
        &self,
        record: &PendingArtifact<P::Owner>,
        on_progress: PercentCallback,
    ) -> Result<(), StageError> {
        let target = record
            .signed_target
            .as_ref()
            .ok_or_else(|| StageError::MissingTarget(record.local_path.clone()))?;

        let data = self
            .files
            .read(&record.local_path)
            .await
            .map_err(|e| StageError::File(e.to_string()))?;
        tracing::debug!(
            pipeline = self.profile.name(),
            local_path = %record.local_path,
            bytes = data.len(),
            "Uploading file"
        );

        let request = self
            .profile
            .upload_request(target, record.file_name(), data);

        let last = Arc::new(AtomicU8::new(0));
        let progress: UploadProgress = Arc::new(move |sent, total| {
            let percent = upload_percent(sent, total);
            let previous = last.fetch_max(percent, Ordering::SeqCst);
            if percent > previous {
                on_progress(percent);
            }
        });

        let response = self
            .http
            .send_with_progress(request, progress)
            .await
            .map_err(|e| StageError::Request {
                stage: Stage::Upload,
                message: e.to_string(),
            })?;
        if !response.is_success() {
            return Err(rejected(Stage::Upload, response));
        }
        Ok(())
    }

    /// Create the backend record for an uploaded file
    pub async fn register(&self, record: &PendingArtifact<P::Owner>) -> Result<(), StageError> {
        let target = record
            .signed_target
            .as_ref()
            .ok_or_else(|| StageError::MissingTarget(record.local_path.clone()))?;

        let request = self.profile.register_request(target, &record.owner);
        let response = self.send(Stage::Register, request).await?;
        if response.status >= 300 {
            return Err(rejected(Stage::Register, response));
        }
        Ok(())
    }

    async fn send(&self, stage: Stage, request: HttpRequest) -> Result<HttpResponse, StageError> {
        self.http
            .send(request)
            .await
            .map_err(|e| StageError::Request {
                stage,
                message: e.to_string(),
            })
    }
}

fn rejected(stage: Stage, response: HttpResponse) -> StageError {
    StageError::Rejected {
        stage,
        status: response.status,
        message: response
            .error_message
            .unwrap_or_else(|| format!("unexpected status {}", response.status)),
    }
}

/// Run a stage on its own task so that a panic surfaces as a stage failure.
pub async fn run_isolated<T, F>(stage: Stage, stage_future: F) -> Result<T, StageError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, StageError>> + Send + 'static,
{
    match tokio::spawn(stage_future).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            tracing::error!(stage = %stage, "Stage executor panicked");
            Err(StageError::Panicked(stage))
        }
        Err(e) => Err(StageError::Request {
            stage,
            message: e.to_string(),
        }),
    }
}
