//! Mock HTTP Client Implementation
//!
//! Programmable mock for testing upload stages:
//! - `MockHttpClient`: route table with request recording
//! - `MockReply`: a canned response or a simulated network failure
//! - Configurable delay and upload progress steps

use std::sync::{Arc, Mutex, RwLock};

use crate::{HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, UploadProgress};

/// What the mock answers for a matched request
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Return a response with this status and body
    Respond {
        status: u16,
        data: serde_json::Value,
    },
    /// Fail at the transport level
    NetworkError(String),
}

impl MockReply {
    pub fn status(status: u16) -> Self {
        Self::Respond {
            status,
            data: serde_json::Value::Null,
        }
    }

    pub fn json(status: u16, data: serde_json::Value) -> Self {
        Self::Respond { status, data }
    }
}

#[derive(Debug, Clone)]
struct MockRoute {
    method: HttpMethod,
    url_fragment: String,
    reply: MockReply,
    once: bool,
}

impl MockRoute {
    fn matches(&self, request: &HttpRequest) -> bool {
        self.method == request.method && request.url.contains(&self.url_fragment)
    }
}

/// Programmable behavior for the mock HTTP client
#[derive(Debug)]
pub struct MockHttpBehavior {
    routes: RwLock<Vec<MockRoute>>,
    delay_ms: RwLock<u64>,
    progress_steps: RwLock<Vec<f64>>,
    accept_unmatched: RwLock<bool>,
}

impl Default for MockHttpBehavior {
    fn default() -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
            delay_ms: RwLock::new(0),
            progress_steps: RwLock::new(vec![0.25, 0.5, 0.75, 1.0]),
            accept_unmatched: RwLock::new(false),
        }
    }
}

/// A recorded request for test assertions
#[derive(Debug, Clone)]
pub struct RecordedHttpRequest {
    pub request: HttpRequest,
    pub with_progress: bool,
}

/// Mock HTTP client with programmable routes.
///
/// Once-routes are consumed first, in registration order. Persistent routes
/// are then tried newest first, so a later `on` overrides an earlier one.
/// Unmatched requests get a 404 unless the client is accepting.
#[derive(Debug, Clone, Default)]
pub struct MockHttpClient {
    behavior: Arc<MockHttpBehavior>,
    history: Arc<Mutex<Vec<RecordedHttpRequest>>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client that answers every unmatched request with 200 and a payload
    /// shaped like both signing responses the pipeline understands.
    pub fn accepting() -> Self {
        let client = Self::new();
        *client.behavior.accept_unmatched.write().unwrap() = true;
        client
    }

    /// Answer every matching request with `reply`
    pub fn on(&self, method: HttpMethod, url_fragment: &str, reply: MockReply) {
        self.push_route(method, url_fragment, reply, false);
    }

    /// Answer the next matching request with `reply`, then forget the route
    pub fn on_once(&self, method: HttpMethod, url_fragment: &str, reply: MockReply) {
        self.push_route(method, url_fragment, reply, true);
    }

    fn push_route(&self, method: HttpMethod, url_fragment: &str, reply: MockReply, once: bool) {
        self.behavior.routes.write().unwrap().push(MockRoute {
            method,
            url_fragment: url_fragment.to_string(),
            reply,
            once,
        });
    }

    /// Hold every request for `delay_ms` before answering
    pub fn set_delay(&self, delay_ms: u64) {
        *self.behavior.delay_ms.write().unwrap() = delay_ms;
    }

    /// Fractions of the body reported to progress callbacks, in order
    pub fn set_progress_steps(&self, steps: Vec<f64>) {
        *self.behavior.progress_steps.write().unwrap() = steps;
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<RecordedHttpRequest> {
        self.history.lock().unwrap().clone()
    }

    /// Count recorded requests matching a method and URL fragment
    pub fn request_count(&self, method: HttpMethod, url_fragment: &str) -> usize {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.request.method == method && r.request.url.contains(url_fragment))
            .count()
    }

    /// Clear history
    pub fn reset_history(&self) {
        self.history.lock().unwrap().clear();
    }

    fn resolve(&self, request: &HttpRequest) -> MockReply {
        let mut routes = self.behavior.routes.write().unwrap();

        if let Some(index) = routes.iter().position(|r| r.once && r.matches(request)) {
            return routes.remove(index).reply;
        }
        if let Some(route) = routes.iter().rev().find(|r| !r.once && r.matches(request)) {
            return route.reply.clone();
        }
        drop(routes);

        if *self.behavior.accept_unmatched.read().unwrap() {
            MockReply::json(200, accepting_payload())
        } else {
            MockReply::json(404, serde_json::json!({"detail": "Not found."}))
        }
    }

    async fn handle(
        &self,
        request: HttpRequest,
        progress: Option<UploadProgress>,
    ) -> Result<HttpResponse, HttpError> {
        tracing::info!(method = %request.method, url = %request.url, "Mock HTTP: received request");

        self.history.lock().unwrap().push(RecordedHttpRequest {
            request: request.clone(),
            with_progress: progress.is_some(),
        });

        let delay_ms = *self.behavior.delay_ms.read().unwrap();
        let steps = self.behavior.progress_steps.read().unwrap().clone();
        let reply = self.resolve(&request);

        match (progress, request.body.upload_len()) {
            (Some(progress), Some(total)) if !steps.is_empty() => {
                let pause = delay_ms / steps.len() as u64;
                for step in steps {
                    if pause > 0 {
                        tokio::time::sleep(std::time::Duration::from_millis(pause)).await;
                    }
                    let sent = ((total as f64) * step.clamp(0.0, 1.0)).round() as u64;
                    progress(sent, total);
                }
            }
            _ => {
                if delay_ms > 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                }
            }
        }

        match reply {
            MockReply::Respond { status, data } => Ok(HttpResponse::new(status, data)),
            MockReply::NetworkError(message) => Err(HttpError::Request(message)),
        }
    }
}

fn accepting_payload() -> serde_json::Value {
    let id = uuid::Uuid::new_v4();
    serde_json::json!({
        "put_request": format!("https://mock-storage.example.com/uploads/{}", id),
        "url": format!("https://mock-storage.example.com/public/{}", id),
        "upload_id": id.to_string(),
        "fields": {},
        "headers": {"Content-type": "image/jpeg"},
    })
}

#[async_trait::async_trait]
impl HttpClient for MockHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        self.handle(request, None).await
    }

    async fn send_with_progress(
        &self,
        request: HttpRequest,
        progress: UploadProgress,
    ) -> Result<HttpResponse, HttpError> {
        self.handle(request, Some(progress)).await
    }
}
