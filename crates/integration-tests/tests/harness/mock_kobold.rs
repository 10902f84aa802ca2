//! Mock KoboldCpp-compatible server for integration tests
//!
//! Serves `/v1/chat/completions` and `/v1/completions` from per-endpoint
//! scripts of canned responses. When a script runs out the endpoint falls
//! back to a canned success.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::{Json, Router, routing};
use tokio_util::sync::CancellationToken;

/// One canned response
#[derive(Debug, Clone)]
pub struct Scripted {
    pub status: StatusCode,
    pub body: String,
    pub content_type: &'static str,
    pub headers: Vec<(&'static str, String)>,
    pub delay: Duration,
}

impl Scripted {
    fn json(status: StatusCode, body: serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            content_type: "application/json",
            headers: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    /// 200 with a chat-schema completion
    pub fn chat_ok(content: &str) -> Self {
        Self::json(
            StatusCode::OK,
            serde_json::json!({
                "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
            }),
        )
    }

    /// 200 with a plain-completion-schema response
    pub fn completion_ok(text: &str) -> Self {
        Self::json(
            StatusCode::OK,
            serde_json::json!({ "choices": [{ "index": 0, "text": text }] }),
        )
    }

    /// Arbitrary error status with a JSON error body
    pub fn status(status: StatusCode) -> Self {
        Self::json(
            status,
            serde_json::json!({ "error": { "message": "scripted failure" } }),
        )
    }

    /// 429 with an optional `Retry-After` header in seconds
    pub fn rate_limited(retry_after: Option<u64>) -> Self {
        let mut scripted = Self::status(StatusCode::TOO_MANY_REQUESTS);
        if let Some(seconds) = retry_after {
            scripted.headers.push(("retry-after", seconds.to_string()));
        }
        scripted
    }

    /// 200 with a body that is not JSON
    pub fn invalid_json() -> Self {
        Self {
            status: StatusCode::OK,
            body: "<html>definitely not json</html>".to_owned(),
            content_type: "text/html",
            headers: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    /// 200 with JSON that carries no completion text
    pub fn empty_choices() -> Self {
        Self::json(StatusCode::OK, serde_json::json!({ "choices": [] }))
    }

    /// SSE stream of chat-delta chunks followed by `[DONE]`
    pub fn sse_chat(deltas: &[&str]) -> Self {
        let mut body = String::new();
        for delta in deltas {
            let chunk = serde_json::json!({
                "choices": [{ "index": 0, "delta": { "content": delta } }]
            });
            body.push_str(&format!("data: {chunk}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");

        Self {
            status: StatusCode::OK,
            body,
            content_type: "text/event-stream",
            headers: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    /// Delay before responding
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

struct MockState {
    chat_count: AtomicU32,
    completion_count: AtomicU32,
    chat_script: Mutex<VecDeque<Scripted>>,
    completion_script: Mutex<VecDeque<Scripted>>,
}

/// Mock Kobold server with per-endpoint response scripts
pub struct MockKobold {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

impl MockKobold {
    /// Start the mock server, returning immediately
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            chat_count: AtomicU32::new(0),
            completion_count: AtomicU32::new(0),
            chat_script: Mutex::new(VecDeque::new()),
            completion_script: Mutex::new(VecDeque::new()),
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(handle_chat))
            .route("/v1/completions", routing::post(handle_completion))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL for configuring the mock as a backend
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queue a scripted response on the chat endpoint
    pub fn push_chat(&self, scripted: Scripted) {
        self.state.chat_script.lock().unwrap().push_back(scripted);
    }

    /// Queue a scripted response on the plain completion endpoint
    pub fn push_completion(&self, scripted: Scripted) {
        self.state.completion_script.lock().unwrap().push_back(scripted);
    }

    /// Number of chat POSTs received
    pub fn chat_count(&self) -> u32 {
        self.state.chat_count.load(Ordering::Relaxed)
    }

    /// Number of plain completion POSTs received
    pub fn completion_count(&self) -> u32 {
        self.state.completion_count.load(Ordering::Relaxed)
    }
}

impl Drop for MockKobold {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn respond(scripted: Scripted) -> axum::response::Response {
    if !scripted.delay.is_zero() {
        tokio::time::sleep(scripted.delay).await;
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static(scripted.content_type),
    );
    for (name, value) in &scripted.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }

    (scripted.status, headers, scripted.body).into_response()
}

async fn handle_chat(
    State(state): State<Arc<MockState>>,
    Json(_req): Json<serde_json::Value>,
) -> axum::response::Response {
    state.chat_count.fetch_add(1, Ordering::Relaxed);
    let scripted = state
        .chat_script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Scripted::chat_ok("Hello from mock Kobold"));
    respond(scripted).await
}

async fn handle_completion(
    State(state): State<Arc<MockState>>,
    Json(_req): Json<serde_json::Value>,
) -> axum::response::Response {
    state.completion_count.fetch_add(1, Ordering::Relaxed);
    let scripted = state
        .completion_script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Scripted::completion_ok("Hello from mock Kobold"));
    respond(scripted).await
}
