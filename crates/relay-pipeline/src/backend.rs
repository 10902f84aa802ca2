//! Backend capability contract implemented by provider adapters

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::{BackendError, ErrorKind};
use crate::types::{CompletionRequest, CompletionResult, StreamEvent};

/// Lazy, finite sequence of streaming chunks
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, BackendError>> + Send>>;

/// Runtime context handed to a backend for one attempt
///
/// The transport client is a shared handle to the slot's reusable client;
/// cloning it is cheap and does not open new connections.
#[derive(Debug, Clone)]
pub struct BackendContext {
    /// Reusable transport client owned by the pipeline slot
    pub client: reqwest::Client,
    /// Opaque per-attempt metadata
    pub metadata: HashMap<String, String>,
}

impl BackendContext {
    /// Context wrapping a slot's transport client
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            metadata: HashMap::new(),
        }
    }
}

/// Contract implemented by each upstream provider adapter
///
/// The pipeline holds `Arc<dyn Backend>` references and never depends on
/// adapter internals.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Produce a full completion
    ///
    /// Never panics for ordinary upstream failure; every failure becomes an
    /// error-kinded [`CompletionResult`].
    async fn complete(&self, request: &CompletionRequest, context: &BackendContext) -> CompletionResult;

    /// Open a stream of completion chunks
    ///
    /// The default implementation reports that streaming is unsupported.
    async fn stream(&self, request: &CompletionRequest, context: &BackendContext) -> Result<EventStream, BackendError> {
        let _ = (request, context);
        Err(BackendError::new(
            ErrorKind::StreamingNotSupported,
            format!("backend {} does not support streaming", self.name()),
        ))
    }
}
