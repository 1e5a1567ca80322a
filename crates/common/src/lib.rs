//! Shared utilities, configuration, and error handling for Docsync
//!
//! This crate provides common functionality used across the Docsync workspace:
//! - Configuration management following 12-factor principles
//! - Error types and handling
//! - State machine error types
//! - Key hashing and tracing setup

pub mod config;
pub mod crypto;
pub mod error;
pub mod state;
pub mod telemetry;

pub use config::Config;
pub use crypto::key_digest;
pub use error::{Error, Result};
pub use state::StateError;
