//! Resilient client-side dispatch for LLM completion backends
//!
//! A [`BackendPipeline`] walks configured backends in order, gating each
//! behind a circuit breaker and a concurrency semaphore, optionally hedging
//! slow attempts, and falling through to the next backend on failure. The
//! [`provider::KoboldBackend`] adapter speaks the OpenAI-style surface
//! exposed by KoboldCpp with a per-endpoint retry cascade.

#![allow(clippy::must_use_candidate, clippy::missing_panics_doc)]

pub mod backend;
pub mod breaker;
pub mod error;
pub mod pipeline;
pub mod provider;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

pub use backend::{Backend, BackendContext, EventStream};
pub use breaker::CircuitBreaker;
pub use error::{BackendError, ErrorKind};
pub use pipeline::{BackendPipeline, BackendSlot};
pub use provider::KoboldBackend;
pub use types::{CircuitBreakerConfig, CompletionRequest, CompletionResult, HedgeConfig, StreamEvent};

/// Build a pipeline from loaded configuration
///
/// Backends keep their declaration order from the config file.
///
/// # Errors
///
/// Returns a `configuration_error` if a duration string does not parse or
/// pipeline construction fails.
pub fn from_config(config: &relay_config::Config) -> Result<BackendPipeline, BackendError> {
    let mut slots = Vec::with_capacity(config.backends.len());

    for (name, backend) in &config.backends {
        let timeout = parse_duration(&backend.timeout, name, "timeout")?;
        let hedge_delay = parse_duration(&backend.hedging.delay, name, "hedge delay")?;
        let reset_timeout = parse_duration(&backend.circuit_breaker.reset_timeout, name, "reset timeout")?;

        let adapter = match backend.backend_type {
            relay_config::BackendType::Kobold => {
                let mut adapter = KoboldBackend::new(name.clone(), backend.base_url.clone()).with_retry(
                    provider::kobold::RetryConfig {
                        max_retries: backend.retry.max_retries,
                    },
                );
                if let Some(key) = &backend.api_key {
                    adapter = adapter.with_api_key(key.clone());
                }
                Arc::new(adapter) as Arc<dyn Backend>
            }
        };

        slots.push(
            BackendSlot::new(adapter)
                .with_concurrency(backend.concurrency)
                .with_timeout(timeout)
                .with_hedging(HedgeConfig {
                    hedges: backend.hedging.hedges,
                    hedge_delay,
                })
                .with_circuit_breaker(CircuitBreakerConfig {
                    failure_threshold: backend.circuit_breaker.failure_threshold,
                    reset_timeout,
                }),
        );
    }

    BackendPipeline::new(slots)
}

fn parse_duration(value: &str, backend: &str, field: &str) -> Result<Duration, BackendError> {
    duration_str::parse(value).map_err(|e| {
        BackendError::new(
            ErrorKind::ConfigurationError,
            format!("backend {backend}: invalid {field} '{value}': {e}"),
        )
    })
}
