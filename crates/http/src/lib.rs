//! Docsync HTTP Service
//!
//! Provides the request/response transport used by every upload stage:
//! - reqwest-based client for production, with upload progress reporting
//! - Mock client with programmable routes for testing and development
//! - Configurable provider and authorization token

pub mod client;
pub mod mock;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("HTTP configuration error: {0}")]
    Configuration(String),

    #[error("HTTP request error: {0}")]
    Request(String),

    #[error("HTTP response error: {0}")]
    Response(String),
}

/// HTTP methods used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// File part of a multipart form
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub field_name: String,
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Multipart form body: plain text fields followed by one file part
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub file: FilePart,
}

/// Request body
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HttpBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Bytes {
        data: Vec<u8>,
        content_type: String,
    },
    Multipart(MultipartForm),
}

impl HttpBody {
    /// Number of binary payload bytes progress is reported against, if any.
    pub fn upload_len(&self) -> Option<u64> {
        match self {
            Self::Bytes { data, .. } => Some(data.len() as u64),
            Self::Multipart(form) => Some(form.file.data.len() as u64),
            Self::Empty | Self::Json(_) => None,
        }
    }
}

/// An outgoing HTTP request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: HttpBody,
    /// Attach the configured authorization header
    pub authenticated: bool,
}

impl HttpRequest {
    /// Create a request with no body, headers or query
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: HttpBody::Empty,
            authenticated: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, url)
    }

    /// Append a query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set a JSON body
    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = HttpBody::Json(body);
        self
    }

    /// Set a raw binary body
    pub fn with_bytes(mut self, data: Vec<u8>, content_type: impl Into<String>) -> Self {
        self.body = HttpBody::Bytes {
            data,
            content_type: content_type.into(),
        };
        self
    }

    /// Set a multipart form body
    pub fn with_multipart(mut self, form: MultipartForm) -> Self {
        self.body = HttpBody::Multipart(form);
        self
    }

    /// Mark the request as needing the authorization header
    pub fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }

    /// Look up a header value, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Response from any HTTP call.
///
/// Non-2xx statuses are ordinary responses; only transport failures are
/// reported as `HttpError`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub data: serde_json::Value,
    pub error_message: Option<String>,
}

impl HttpResponse {
    pub fn new(status: u16, data: serde_json::Value) -> Self {
        let error_message = if (200..300).contains(&status) {
            None
        } else {
            Some(extract_error_message(status, &data))
        };
        Self {
            status,
            data,
            error_message,
        }
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn extract_error_message(status: u16, data: &serde_json::Value) -> String {
    for key in ["detail", "message", "error"] {
        if let Some(message) = data.get(key).and_then(|v| v.as_str()) {
            return message.to_string();
        }
    }
    match data {
        serde_json::Value::String(text) if !text.is_empty() => text.clone(),
        _ => format!("request failed with status {}", status),
    }
}

/// Upload progress callback, invoked with `(bytes_sent, total_bytes)`.
pub type UploadProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Join a base URL and a relative path with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// HTTP service configuration.
#[derive(Clone)]
pub struct HttpConfig {
    /// HTTP provider (reqwest, mock)
    pub provider: String,
    /// Backend session token
    pub auth_token: Option<String>,
    /// Authorization scheme for the token (Token, Bearer)
    pub auth_token_type: String,
}

impl std::fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConfig")
            .field("provider", &self.provider)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("auth_token_type", &self.auth_token_type)
            .finish()
    }
}

impl HttpConfig {
    /// Create HTTP config from environment variables.
    pub fn from_env() -> Result<Self, HttpError> {
        let provider = std::env::var("HTTP_PROVIDER").unwrap_or_else(|_| "reqwest".to_string());
        let auth_token = std::env::var("AUTH_TOKEN").ok().filter(|t| !t.is_empty());
        let auth_token_type =
            std::env::var("AUTH_TOKEN_TYPE").unwrap_or_else(|_| "Token".to_string());

        if auth_token_type != "Token" && auth_token_type != "Bearer" {
            return Err(HttpError::Configuration(format!(
                "Unsupported AUTH_TOKEN_TYPE: {}. Supported types: Token, Bearer",
                auth_token_type
            )));
        }

        Ok(Self {
            provider,
            auth_token,
            auth_token_type,
        })
    }

    /// Authorization header value, if a token is configured
    pub fn authorization(&self) -> Option<String> {
        self.auth_token
            .as_ref()
            .map(|token| format!("{} {}", self.auth_token_type, token))
    }
}

/// HTTP client trait for different implementations.
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    /// Send a request and collect the response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;

    /// Send a request, reporting how many body bytes have been sent.
    async fn send_with_progress(
        &self,
        request: HttpRequest,
        progress: UploadProgress,
    ) -> Result<HttpResponse, HttpError>;
}

/// Factory for creating HttpClient implementations.
pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Create an HttpClient based on configuration.
    pub fn create(config: HttpConfig) -> Result<Box<dyn HttpClient>, HttpError> {
        match config.provider.as_str() {
            "reqwest" => {
                tracing::info!("Creating reqwest HTTP client");
                Ok(Box::new(client::ReqwestHttpClient::new(config)?))
            }
            "mock" => {
                tracing::info!("Creating mock HTTP client");
                Ok(Box::new(mock::MockHttpClient::accepting()))
            }
            provider => Err(HttpError::Configuration(format!(
                "Unknown HTTP provider: {}. Supported providers: reqwest, mock",
                provider
            ))),
        }
    }
}
