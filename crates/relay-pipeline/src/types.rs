use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Normalized request handed to completion backends
///
/// Carries no network identity; a fresh value is constructed per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Prompt text to complete
    pub prompt: String,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f64,
    /// Nucleus sampling threshold
    pub top_p: f64,
    /// Whether the caller wants incremental chunks
    #[serde(default)]
    pub stream: bool,
    /// Opaque caller-supplied metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CompletionRequest {
    /// Create a request with default sampling parameters
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: 256,
            temperature: 0.7,
            top_p: 1.0,
            stream: false,
            metadata: HashMap::new(),
        }
    }
}

/// Outcome of one completion call
///
/// Exactly one of `completion` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResult {
    /// Generated text on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<String>,
    /// Error kind on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// Human-readable failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Raw provider payload, when one was received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,
}

impl CompletionResult {
    /// Successful result carrying completion text
    pub fn success(completion: impl Into<String>) -> Self {
        Self {
            completion: Some(completion.into()),
            error: None,
            details: None,
            raw_response: None,
        }
    }

    /// Failed result with a kind and detail message
    pub fn failure(kind: ErrorKind, details: impl Into<String>) -> Self {
        Self {
            completion: None,
            error: Some(kind),
            details: Some(details.into()),
            raw_response: None,
        }
    }

    /// Failed result that retains the provider's raw payload
    pub fn failure_with_raw(kind: ErrorKind, details: impl Into<String>, raw: serde_json::Value) -> Self {
        Self {
            raw_response: Some(raw),
            ..Self::failure(kind, details)
        }
    }

    /// Whether this result carries a completion
    pub const fn is_success(&self) -> bool {
        self.completion.is_some()
    }

    /// The error kind, if this result is a failure
    pub const fn kind(&self) -> Option<ErrorKind> {
        self.error
    }
}

/// A chunk emitted by a streaming backend
///
/// The terminal chunk has `done = true`; nothing follows it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Incremental text
    pub delta: String,
    /// Whether the stream has completed
    #[serde(default)]
    pub done: bool,
    /// Optional chunk metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StreamEvent {
    /// A content chunk
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            ..Self::default()
        }
    }

    /// The terminal chunk
    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }
}

/// Hedged dispatch settings for one backend slot
#[derive(Debug, Clone, Copy)]
pub struct HedgeConfig {
    /// Extra parallel attempts beyond the first
    pub hedges: u32,
    /// Stagger delay between launching successive attempts
    pub hedge_delay: Duration,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            hedges: 0,
            hedge_delay: Duration::from_millis(150),
        }
    }
}

/// Circuit breaker settings for one backend slot
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker
    pub failure_threshold: u32,
    /// Cooldown before the breaker lazily resets
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn success_and_failure_are_mutually_exclusive() {
        let ok = CompletionResult::success("hello");
        assert!(ok.is_success());
        assert!(ok.error.is_none());

        let err = CompletionResult::failure(ErrorKind::ApiServerError, "boom");
        assert!(!err.is_success());
        assert_eq!(err.kind(), Some(ErrorKind::ApiServerError));
        assert!(err.completion.is_none());
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let result = CompletionResult::failure(ErrorKind::CircuitOpen, "open");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error"], "circuit_open");
    }
}
