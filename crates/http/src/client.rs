//! reqwest HTTP Client Implementation
//!
//! Real client used for the backend API and for direct-to-blob-storage
//! uploads. Binary bodies are streamed in fixed-size chunks so that upload
//! progress can be reported while the transfer is running.

use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};

use crate::{
    HttpBody, HttpClient, HttpConfig, HttpError, HttpMethod, HttpRequest, HttpResponse,
    UploadProgress,
};

/// Size of each streamed body chunk.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// reqwest-backed HTTP client.
pub struct ReqwestHttpClient {
    http: reqwest::Client,
    authorization: Option<String>,
}

impl ReqwestHttpClient {
    /// Create a new client from configuration.
    pub fn new(config: HttpConfig) -> Result<Self, HttpError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| HttpError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            authorization: config.authorization(),
        })
    }

    async fn execute(
        &self,
        request: HttpRequest,
        progress: Option<UploadProgress>,
    ) -> Result<HttpResponse, HttpError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.http.request(method, &request.url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.authenticated {
            if let Some(authorization) = &self.authorization {
                builder = builder.header(AUTHORIZATION, authorization.as_str());
            }
        }

        builder = match request.body {
            HttpBody::Empty => builder,
            HttpBody::Json(body) => builder.json(&body),
            HttpBody::Bytes { data, content_type } => {
                let len = data.len() as u64;
                builder
                    .header(CONTENT_TYPE, content_type)
                    .header(CONTENT_LENGTH, len)
                    .body(progress_body(data, progress))
            }
            HttpBody::Multipart(form) => {
                let mut multipart = reqwest::multipart::Form::new();
                for (name, value) in form.fields {
                    multipart = multipart.text(name, value);
                }
                let file = form.file;
                let len = file.data.len() as u64;
                let part =
                    reqwest::multipart::Part::stream_with_length(progress_body(file.data, progress), len)
                        .file_name(file.file_name)
                        .mime_str(&file.content_type)
                        .map_err(|e| {
                            HttpError::Request(format!(
                                "Invalid content type {}: {}",
                                file.content_type, e
                            ))
                        })?;
                multipart = multipart.part(file.field_name, part);
                builder.multipart(multipart)
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| HttpError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| HttpError::Response(format!("Failed to read response body: {}", e)))?;

        let data = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        };

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status,
            "HTTP request completed"
        );

        Ok(HttpResponse::new(status, data))
    }
}

/// Wrap a payload into a body that reports cumulative bytes as chunks are
/// handed to the connection.
fn progress_body(data: Vec<u8>, progress: Option<UploadProgress>) -> reqwest::Body {
    let Some(progress) = progress else {
        return reqwest::Body::from(data);
    };

    let total = data.len() as u64;
    let chunks: Vec<Vec<u8>> = data.chunks(UPLOAD_CHUNK_SIZE).map(<[u8]>::to_vec).collect();
    let mut sent = 0u64;
    let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
        sent += chunk.len() as u64;
        progress(sent, total);
        Ok::<_, std::io::Error>(chunk)
    }));

    reqwest::Body::wrap_stream(stream)
}

#[async_trait::async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        self.execute(request, None).await
    }

    async fn send_with_progress(
        &self,
        request: HttpRequest,
        progress: UploadProgress,
    ) -> Result<HttpResponse, HttpError> {
        self.execute(request, Some(progress)).await
    }
}
