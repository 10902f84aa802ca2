use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::CompletionResult;

/// Closed taxonomy of failure kinds surfaced by the pipeline and adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid pipeline or adapter construction
    ConfigurationError,
    /// A slot's circuit breaker rejected the request
    CircuitOpen,
    /// Every configured backend was unavailable or failed
    NoBackendAvailable,
    /// A backend produced no usable result
    BackendError,
    /// The backend does not implement streaming
    StreamingNotSupported,
    /// A stream failed after it was opened
    StreamingError,
    /// Upstream rejected the credentials (401/403)
    ApiAuthenticationError,
    /// Upstream rate-limited the request (429)
    ApiRateLimited,
    /// Upstream rejected the request (other 4xx)
    ApiClientError,
    /// Upstream failed internally (5xx)
    ApiServerError,
    /// Connect or timeout failure reaching the upstream
    ApiConnectionError,
    /// Any other transport-level request failure
    ApiRequestError,
    /// Response body was not valid JSON
    ApiResponseFormatError,
    /// Response JSON was missing the expected fields
    ApiResponseStructureError,
    /// Upstream failed in a way no other kind describes
    ApiUnknownError,
}

impl ErrorKind {
    /// Whether a retry against another endpoint or backend may plausibly succeed
    ///
    /// Terminal kinds (auth, client, format, structure, configuration) indicate
    /// the request itself will keep failing.
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::CircuitOpen
                | Self::NoBackendAvailable
                | Self::BackendError
                | Self::StreamingError
                | Self::ApiRateLimited
                | Self::ApiServerError
                | Self::ApiConnectionError
                | Self::ApiRequestError
                | Self::ApiUnknownError
        )
    }
}

/// Structured error used on the streaming path and for construction failures
#[derive(Debug, Clone, Error)]
#[error("{kind}: {detail}")]
pub struct BackendError {
    /// Failure kind from the closed taxonomy
    pub kind: ErrorKind,
    /// Human-readable detail
    pub detail: String,
}

impl BackendError {
    /// Create an error with a kind and detail message
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<BackendError> for CompletionResult {
    fn from(error: BackendError) -> Self {
        Self::failure(error.kind, error.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_terminal_kinds_split() {
        assert!(ErrorKind::ApiRateLimited.is_transient());
        assert!(ErrorKind::ApiServerError.is_transient());
        assert!(ErrorKind::ApiConnectionError.is_transient());
        assert!(ErrorKind::ApiRequestError.is_transient());

        assert!(!ErrorKind::ApiAuthenticationError.is_transient());
        assert!(!ErrorKind::ApiClientError.is_transient());
        assert!(!ErrorKind::ApiResponseFormatError.is_transient());
        assert!(!ErrorKind::ApiResponseStructureError.is_transient());
        assert!(!ErrorKind::ConfigurationError.is_transient());
    }

    #[test]
    fn display_matches_wire_form() {
        assert_eq!(ErrorKind::ApiAuthenticationError.to_string(), "api_authentication_error");
        assert_eq!(ErrorKind::NoBackendAvailable.to_string(), "no_backend_available");
        assert_eq!(ErrorKind::CircuitOpen.to_string(), "circuit_open");
    }

    #[test]
    fn backend_error_converts_to_result() {
        let error = BackendError::new(ErrorKind::StreamingError, "mid-stream failure");
        let result: CompletionResult = error.into();
        assert_eq!(result.kind(), Some(ErrorKind::StreamingError));
        assert_eq!(result.details.as_deref(), Some("mid-stream failure"));
    }
}
