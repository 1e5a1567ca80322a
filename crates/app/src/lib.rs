//! Docsync application composition root
//!
//! Wires configuration, storage, HTTP and progress reporting into the two
//! upload pipelines.

use std::sync::Arc;

use docsync_common::Config;
use docsync_http::{HttpClient, HttpClientFactory, HttpConfig};
use docsync_storage::{FileSystem, KeyValueStore, KeyValueStoreFactory, LocalFileSystem, StorageConfig};
use docsync_uploads::{
    DispatchOutcome, InvoiceProfile, PipelineOptions, PipelineServices, ProgressSink,
    ReceiptProfile, UploadCoordinator,
};
use serde_json::Value;

/// The invoice and receipt pipelines sharing one store and HTTP client
#[derive(Clone)]
pub struct Pipelines {
    pub invoices: UploadCoordinator<InvoiceProfile>,
    pub receipts: UploadCoordinator<ReceiptProfile>,
}

/// Outcomes of a startup resume, per pipeline
#[derive(Debug, Default)]
pub struct ResumeReport {
    pub invoices: Vec<(String, DispatchOutcome)>,
    pub receipts: Vec<(String, DispatchOutcome)>,
}

impl ResumeReport {
    /// Records that did not reach registration
    pub fn stalled(&self) -> usize {
        self.invoices
            .iter()
            .chain(self.receipts.iter())
            .filter(|(_, outcome)| matches!(outcome, DispatchOutcome::Stalled { .. }))
            .count()
    }
}

impl Pipelines {
    /// Build both pipelines over the given collaborators
    pub fn new(config: &Config, services: PipelineServices) -> Self {
        let options = PipelineOptions {
            retain_completed: config.retain_completed,
        };

        Self {
            invoices: UploadCoordinator::new(
                InvoiceProfile::new(&config.api_base_url),
                services.clone(),
                options,
            ),
            receipts: UploadCoordinator::new(
                ReceiptProfile::new(&config.spend_api_base_url),
                services,
                options,
            ),
        }
    }

    /// Resume both pipelines concurrently
    pub async fn resume(&self) -> anyhow::Result<ResumeReport> {
        let (invoices, receipts) = tokio::join!(self.invoices.resume(), self.receipts.resume());
        Ok(ResumeReport {
            invoices: invoices?,
            receipts: receipts?,
        })
    }

    /// Drop every pending record of both pipelines
    pub async fn clear(&self) -> anyhow::Result<usize> {
        let invoices = self.invoices.clear().await?;
        let receipts = self.receipts.clear().await?;
        Ok(invoices + receipts)
    }
}

/// Create the pipelines from environment configuration
pub async fn create_pipelines(
    config: &Config,
    progress: Arc<dyn ProgressSink>,
) -> anyhow::Result<Pipelines> {
    let http_config = HttpConfig::from_env()?;
    let http: Arc<dyn HttpClient> = Arc::from(HttpClientFactory::create(http_config)?);

    let storage_config = StorageConfig {
        dir: config.storage_dir.clone(),
        ..StorageConfig::from_env()?
    };
    let kv: Arc<dyn KeyValueStore> = Arc::from(KeyValueStoreFactory::create(storage_config).await?);
    let files: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());

    Ok(Pipelines::new(
        config,
        PipelineServices {
            kv,
            http,
            files,
            progress,
        },
    ))
}

/// Parse a `key=value` registration option. Values that read as JSON keep
/// their type; anything else is a string.
pub fn parse_option(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing option name in '{}'", raw));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
