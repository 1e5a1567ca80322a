//! Common test utilities and fixtures for integration tests
//!
//! Every test gets its own wiremock server standing in for the backend and
//! object storage, a temporary directory for the on-disk record store, and
//! real image files written under that directory.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use docsync_http::client::ReqwestHttpClient;
use docsync_http::HttpConfig;
use docsync_storage::{FileKeyValueStore, LocalFileSystem};
use docsync_uploads::{
    InvoiceProfile, PipelineOptions, PipelineServices, ReceiptProfile, RecordingProgressSink,
    UploadCoordinator,
};
use tempfile::TempDir;
use wiremock::MockServer;

pub const AUTH_TOKEN: &str = "integration-token";

/// One device: backend server, store directory and captured files
pub struct TestDevice {
    pub server: MockServer,
    pub dir: TempDir,
    pub progress: RecordingProgressSink,
}

impl TestDevice {
    pub async fn new() -> Result<Self> {
        Ok(Self {
            server: MockServer::start().await,
            dir: tempfile::tempdir()?,
            progress: RecordingProgressSink::new(),
        })
    }

    pub fn store_dir(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    /// Write a captured image and return its path
    pub fn capture(&self, name: &str, bytes: &[u8]) -> Result<String> {
        let photos = self.dir.path().join("photos");
        std::fs::create_dir_all(&photos)?;
        let path = photos.join(name);
        std::fs::write(&path, bytes)?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Open the store and build fresh collaborators, as an app launch does
    pub async fn services(&self) -> Result<PipelineServices> {
        let kv = FileKeyValueStore::open(self.store_dir()).await?;
        let http = ReqwestHttpClient::new(HttpConfig {
            provider: "reqwest".to_string(),
            auth_token: Some(AUTH_TOKEN.to_string()),
            auth_token_type: "Token".to_string(),
        })?;

        Ok(PipelineServices {
            kv: Arc::new(kv),
            http: Arc::new(http),
            files: Arc::new(LocalFileSystem::new()),
            progress: Arc::new(self.progress.clone()),
        })
    }

    pub async fn invoices(&self) -> Result<UploadCoordinator<InvoiceProfile>> {
        self.invoices_with(PipelineOptions::default()).await
    }

    pub async fn invoices_with(
        &self,
        options: PipelineOptions,
    ) -> Result<UploadCoordinator<InvoiceProfile>> {
        Ok(UploadCoordinator::new(
            InvoiceProfile::new(self.server.uri()),
            self.services().await?,
            options,
        ))
    }

    pub async fn receipts(&self) -> Result<UploadCoordinator<ReceiptProfile>> {
        Ok(UploadCoordinator::new(
            ReceiptProfile::new(self.server.uri()),
            self.services().await?,
            PipelineOptions::default(),
        ))
    }

    /// Requests the server received for a method and path
    pub async fn requests(&self, method: &str, path: &str) -> Vec<wiremock::Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == method && r.url.path() == path)
            .collect()
    }
}
