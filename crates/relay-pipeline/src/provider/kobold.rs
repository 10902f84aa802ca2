//! KoboldCpp-compatible backend adapter
//!
//! KoboldCpp exposes an OpenAI-style surface. The adapter tries the chat
//! endpoint first, then the plain completion endpoint, with a bounded retry
//! loop per endpoint. Malformed responses are terminal for the endpoint but
//! fall through to the next one.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::backend::{Backend, BackendContext, EventStream};
use crate::error::{BackendError, ErrorKind};
use crate::types::{CompletionRequest, CompletionResult, StreamEvent};

/// Model name reported to the OpenAI-style surface; KoboldCpp ignores it
const DEFAULT_MODEL: &str = "koboldcpp-model";

/// Fixed backoff schedule indexed by attempt number, clamped at the last entry
const BACKOFF_SCHEDULE: [Duration; 4] = [
    Duration::from_millis(250),
    Duration::from_millis(500),
    Duration::from_secs(1),
    Duration::from_secs(2),
];

fn backoff(attempt: u32) -> Duration {
    let last = BACKOFF_SCHEDULE.len() - 1;
    let index = usize::try_from(attempt).map_or(last, |i| i.min(last));
    BACKOFF_SCHEDULE[index]
}

/// Retry behavior for one endpoint
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts per endpoint before advancing to the next one
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// One upstream endpoint the adapter can talk to
///
/// Payload builders and extractors are pure; the same request always
/// produces the same payload.
#[derive(Clone, Copy)]
struct EndpointDescriptor {
    name: &'static str,
    path: &'static str,
    build_payload: fn(&CompletionRequest, bool) -> Value,
    extract_completion: fn(&Value) -> Option<String>,
    extract_delta: fn(&Value) -> Option<String>,
}

/// Endpoints in cascade order: chat first, plain completion second
const ENDPOINTS: [EndpointDescriptor; 2] = [
    EndpointDescriptor {
        name: "chat",
        path: "/v1/chat/completions",
        build_payload: build_chat_payload,
        extract_completion: extract_chat_completion,
        extract_delta: extract_chat_delta,
    },
    EndpointDescriptor {
        name: "completion",
        path: "/v1/completions",
        build_payload: build_completion_payload,
        extract_completion: extract_completion_text,
        extract_delta: extract_completion_text,
    },
];

fn build_chat_payload(request: &CompletionRequest, stream: bool) -> Value {
    serde_json::json!({
        "model": DEFAULT_MODEL,
        "messages": [{ "role": "user", "content": request.prompt }],
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "top_p": request.top_p,
        "stream": stream,
    })
}

fn build_completion_payload(request: &CompletionRequest, stream: bool) -> Value {
    serde_json::json!({
        "model": DEFAULT_MODEL,
        "prompt": request.prompt,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "top_p": request.top_p,
        "stream": stream,
    })
}

fn extract_chat_completion(body: &Value) -> Option<String> {
    body.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

fn extract_chat_delta(chunk: &Value) -> Option<String> {
    let choice = chunk.get("choices")?.get(0)?;
    let content = choice
        .get("delta")
        .and_then(|delta| delta.get("content"))
        .or_else(|| choice.get("message").and_then(|message| message.get("content")))?;
    content.as_str().filter(|text| !text.is_empty()).map(str::to_owned)
}

fn extract_completion_text(body: &Value) -> Option<String> {
    body.get("choices")?
        .get(0)?
        .get("text")?
        .as_str()
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

/// Classify a transport failure: connect/timeout errors are worth retrying,
/// anything else aborts the cascade
fn classify_transport_error(e: &reqwest::Error) -> (ErrorKind, bool) {
    if e.is_connect() || e.is_timeout() {
        (ErrorKind::ApiConnectionError, true)
    } else {
        (ErrorKind::ApiRequestError, false)
    }
}

/// Longest wait honored from a `Retry-After` header
const MAX_RETRY_AFTER: Duration = Duration::from_secs(10);

/// Parse a `Retry-After` header given in whole seconds, clamped so a hostile
/// or misconfigured upstream cannot stall an attempt indefinitely
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|seconds| Duration::from_secs(seconds).min(MAX_RETRY_AFTER))
}

/// Outcome of a single POST against one endpoint
enum SendOutcome {
    /// Parsed JSON body received
    Body(Value),
    /// Retry the same endpoint after waiting
    Transient {
        result: CompletionResult,
        retry_after: Option<Duration>,
    },
    /// Give up on this endpoint, try the next one
    Terminal(CompletionResult),
    /// Give up on the whole cascade
    Abort(CompletionResult),
}

/// Outcome of opening a streaming POST against one endpoint
enum OpenOutcome {
    Opened(reqwest::Response),
    Transient {
        error: BackendError,
        retry_after: Option<Duration>,
    },
    Terminal(BackendError),
    Abort(BackendError),
}

/// Adapter for a KoboldCpp-compatible server
pub struct KoboldBackend {
    name: String,
    base_url: Url,
    api_key: Option<SecretString>,
    retry: RetryConfig,
}

impl KoboldBackend {
    /// Adapter with default retry behavior and no API key
    pub fn new(name: impl Into<String>, base_url: Url) -> Self {
        Self {
            name: name.into(),
            base_url,
            api_key: None,
            retry: RetryConfig::default(),
        }
    }

    /// Set the bearer token sent with every request
    #[must_use]
    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Set the retry behavior
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint_url(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}{path}")
    }

    fn request_builder(&self, context: &BackendContext, url: &str, payload: &Value) -> reqwest::RequestBuilder {
        let mut builder = context.client.post(url).json(payload);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }
        builder
    }

    async fn send(&self, url: &str, payload: &Value, context: &BackendContext) -> SendOutcome {
        let response = match self.request_builder(context, url, payload).send().await {
            Ok(response) => response,
            Err(e) => {
                let (kind, transient) = classify_transport_error(&e);
                let result = CompletionResult::failure(kind, format!("request failed: {e}"));
                return if transient {
                    SendOutcome::Transient {
                        result,
                        retry_after: None,
                    }
                } else {
                    SendOutcome::Abort(result)
                };
            }
        };

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SendOutcome::Abort(CompletionResult::failure(
                ErrorKind::ApiAuthenticationError,
                format!("upstream rejected credentials ({status})"),
            )),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = parse_retry_after(response.headers());
                SendOutcome::Transient {
                    result: CompletionResult::failure(ErrorKind::ApiRateLimited, "upstream rate limited the request"),
                    retry_after,
                }
            }
            status if status.is_server_error() => SendOutcome::Transient {
                result: CompletionResult::failure(ErrorKind::ApiServerError, format!("upstream returned {status}")),
                retry_after: None,
            },
            status if status.is_client_error() => SendOutcome::Terminal(CompletionResult::failure(
                ErrorKind::ApiClientError,
                format!("upstream returned {status}"),
            )),
            _ => match response.json::<Value>().await {
                Ok(body) => SendOutcome::Body(body),
                Err(e) => SendOutcome::Terminal(CompletionResult::failure(
                    ErrorKind::ApiResponseFormatError,
                    format!("response body was not valid JSON: {e}"),
                )),
            },
        }
    }

    async fn open_stream(&self, url: &str, payload: &Value, context: &BackendContext) -> OpenOutcome {
        let response = match self.request_builder(context, url, payload).send().await {
            Ok(response) => response,
            Err(e) => {
                let (kind, transient) = classify_transport_error(&e);
                let error = BackendError::new(kind, format!("request failed: {e}"));
                return if transient {
                    OpenOutcome::Transient {
                        error,
                        retry_after: None,
                    }
                } else {
                    OpenOutcome::Abort(error)
                };
            }
        };

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => OpenOutcome::Abort(BackendError::new(
                ErrorKind::ApiAuthenticationError,
                format!("upstream rejected credentials ({status})"),
            )),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = parse_retry_after(response.headers());
                OpenOutcome::Transient {
                    error: BackendError::new(ErrorKind::ApiRateLimited, "upstream rate limited the request"),
                    retry_after,
                }
            }
            status if status.is_server_error() => OpenOutcome::Transient {
                error: BackendError::new(ErrorKind::ApiServerError, format!("upstream returned {status}")),
                retry_after: None,
            },
            status if status.is_client_error() => OpenOutcome::Terminal(BackendError::new(
                ErrorKind::ApiClientError,
                format!("upstream returned {status}"),
            )),
            _ => OpenOutcome::Opened(response),
        }
    }

    /// Map an SSE response into a stream of completion chunks
    fn map_sse(response: reqwest::Response, extract_delta: fn(&Value) -> Option<String>) -> EventStream {
        let mapped = response
            .bytes_stream()
            .eventsource()
            .map(move |result| match result {
                Ok(event) => {
                    let data = event.data.trim().to_owned();
                    if data == "[DONE]" {
                        return vec![Ok(StreamEvent::done())];
                    }
                    match serde_json::from_str::<Value>(&data) {
                        Ok(chunk) => match extract_delta(&chunk) {
                            Some(delta) => vec![Ok(StreamEvent::delta(delta))],
                            None => vec![],
                        },
                        Err(e) => {
                            debug!(error = %e, data = %data, "skipping unparseable SSE chunk");
                            vec![]
                        }
                    }
                }
                Err(e) => vec![Err(BackendError::new(ErrorKind::StreamingError, e.to_string()))],
            })
            .flat_map(futures_util::stream::iter);

        Box::pin(mapped)
    }
}

#[async_trait]
impl Backend for KoboldBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest, context: &BackendContext) -> CompletionResult {
        let mut first_terminal: Option<CompletionResult> = None;
        let mut last_transient: Option<CompletionResult> = None;

        'endpoints: for endpoint in &ENDPOINTS {
            let url = self.endpoint_url(endpoint.path);
            let payload = (endpoint.build_payload)(request, false);
            let attempts = self.retry.max_retries.max(1);

            for attempt in 0..attempts {
                match self.send(&url, &payload, context).await {
                    SendOutcome::Body(body) => {
                        if let Some(text) = (endpoint.extract_completion)(&body) {
                            return CompletionResult::success(text);
                        }
                        debug!(backend = %self.name, endpoint = endpoint.name, "response missing completion text");
                        let result = CompletionResult::failure_with_raw(
                            ErrorKind::ApiResponseStructureError,
                            format!("endpoint {} returned no completion text", endpoint.name),
                            body,
                        );
                        first_terminal.get_or_insert(result);
                        continue 'endpoints;
                    }
                    SendOutcome::Abort(result) => return result,
                    SendOutcome::Terminal(result) => {
                        warn!(
                            backend = %self.name,
                            endpoint = endpoint.name,
                            error = %result.kind().map_or_else(String::new, |k| k.to_string()),
                            "endpoint failed, advancing"
                        );
                        first_terminal.get_or_insert(result);
                        continue 'endpoints;
                    }
                    SendOutcome::Transient { result, retry_after } => {
                        last_transient = Some(result);
                        if attempt + 1 < attempts {
                            let wait = retry_after.unwrap_or_else(|| backoff(attempt));
                            warn!(
                                backend = %self.name,
                                endpoint = endpoint.name,
                                attempt,
                                wait = ?wait,
                                "transient failure, retrying"
                            );
                            tokio::time::sleep(wait).await;
                        }
                    }
                }
            }
        }

        first_terminal
            .or(last_transient)
            .unwrap_or_else(|| CompletionResult::failure(ErrorKind::ApiUnknownError, "all endpoints exhausted"))
    }

    async fn stream(&self, request: &CompletionRequest, context: &BackendContext) -> Result<EventStream, BackendError> {
        let mut first_terminal: Option<BackendError> = None;
        let mut last_transient: Option<BackendError> = None;

        'endpoints: for endpoint in &ENDPOINTS {
            let url = self.endpoint_url(endpoint.path);
            let payload = (endpoint.build_payload)(request, true);
            let attempts = self.retry.max_retries.max(1);

            for attempt in 0..attempts {
                match self.open_stream(&url, &payload, context).await {
                    OpenOutcome::Opened(response) => {
                        return Ok(Self::map_sse(response, endpoint.extract_delta));
                    }
                    OpenOutcome::Abort(error) => return Err(error),
                    OpenOutcome::Terminal(error) => {
                        warn!(backend = %self.name, endpoint = endpoint.name, error = %error, "stream open failed, advancing");
                        first_terminal.get_or_insert(error);
                        continue 'endpoints;
                    }
                    OpenOutcome::Transient { error, retry_after } => {
                        last_transient = Some(error);
                        if attempt + 1 < attempts {
                            let wait = retry_after.unwrap_or_else(|| backoff(attempt));
                            warn!(
                                backend = %self.name,
                                endpoint = endpoint.name,
                                attempt,
                                wait = ?wait,
                                "transient failure, retrying stream open"
                            );
                            tokio::time::sleep(wait).await;
                        }
                    }
                }
            }
        }

        Err(first_terminal
            .or(last_transient)
            .unwrap_or_else(|| BackendError::new(ErrorKind::ApiUnknownError, "all endpoints exhausted")))
    }
}
