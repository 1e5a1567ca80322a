//! Configuration management following 12-factor app principles
//!
//! All configuration is loaded from environment variables to ensure
//! clean separation between code and config.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Main backend API (invoices)
    pub api_base_url: String,

    /// Spend backend API (transaction receipts)
    pub spend_api_base_url: String,

    /// Directory holding the device-local key-value store
    pub storage_dir: PathBuf,

    /// Keep registered records until the next startup sweep instead of
    /// deleting them as soon as registration succeeds
    pub retain_completed: bool,

    /// Runtime configuration
    pub rust_log: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let api_base_url =
            env::var("API_BASE_URL").map_err(|_| anyhow::anyhow!("API_BASE_URL is required"))?;

        let config = Self {
            spend_api_base_url: env::var("SPEND_API_BASE_URL")
                .unwrap_or_else(|_| api_base_url.clone()),
            api_base_url,
            storage_dir: env::var("DOCSYNC_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./.docsync")),
            retain_completed: env::var("DOCSYNC_RETAIN_COMPLETED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "docsync=info".to_string()),
        };

        Ok(config)
    }
}
