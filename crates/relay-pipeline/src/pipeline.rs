//! Fallback pipeline over an ordered list of backend slots
//!
//! Walks slots in declared order, gates each behind its circuit breaker,
//! dispatches hedged attempts bounded by the slot semaphore, and falls
//! through to the next slot on failure.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures_util::{Stream, StreamExt};
use relay_telemetry::{KeyValue, PipelineMetrics, metrics::record_duration};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::backend::{Backend, BackendContext, EventStream};
use crate::breaker::CircuitBreaker;
use crate::error::{BackendError, ErrorKind};
use crate::types::{CircuitBreakerConfig, CompletionRequest, CompletionResult, HedgeConfig, StreamEvent};

/// Configuration for one upstream slot in the pipeline
pub struct BackendSlot {
    /// Adapter handling requests for this slot
    pub backend: Arc<dyn Backend>,
    /// Maximum in-flight attempts against this slot
    pub concurrency: usize,
    /// Transport timeout applied to the slot's client
    pub timeout: Duration,
    /// Hedged dispatch settings
    pub hedging: HedgeConfig,
    /// Circuit breaker settings
    pub circuit_breaker: CircuitBreakerConfig,
}

impl BackendSlot {
    /// Slot with default concurrency, timeout, hedging and breaker settings
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            concurrency: 5,
            timeout: Duration::from_secs(120),
            hedging: HedgeConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    /// Set the maximum in-flight attempts
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the transport timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the hedged dispatch settings
    #[must_use]
    pub const fn with_hedging(mut self, hedging: HedgeConfig) -> Self {
        self.hedging = hedging;
        self
    }

    /// Set the circuit breaker settings
    #[must_use]
    pub const fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }
}

/// Runtime state for one slot
struct SlotRuntime {
    name: String,
    backend: Arc<dyn Backend>,
    hedging: HedgeConfig,
    semaphore: Arc<Semaphore>,
    breaker: CircuitBreaker,
    /// Transport client; taken exactly once at shutdown
    client: Mutex<Option<reqwest::Client>>,
}

impl SlotRuntime {
    fn client(&self) -> Option<reqwest::Client> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Resilient dispatch pipeline over ordered backend slots
pub struct BackendPipeline {
    slots: Vec<SlotRuntime>,
    closed: AtomicBool,
    metrics: PipelineMetrics,
}

impl BackendPipeline {
    /// Build a pipeline with a default transport client per slot
    ///
    /// # Errors
    ///
    /// Returns a `configuration_error` if the slot list is empty, a slot has
    /// zero concurrency, or a transport client cannot be built.
    pub fn new(slots: Vec<BackendSlot>) -> Result<Self, BackendError> {
        Self::with_client_factory(slots, |slot| {
            reqwest::Client::builder()
                .timeout(slot.timeout)
                .build()
                .map_err(|e| {
                    BackendError::new(
                        ErrorKind::ConfigurationError,
                        format!("failed to build transport client: {e}"),
                    )
                })
        })
    }

    /// Build a pipeline with an injected transport client factory
    ///
    /// The factory runs once per slot at construction; the resulting client
    /// is shared by every attempt against that slot.
    ///
    /// # Errors
    ///
    /// Returns a `configuration_error` if the slot list is empty, a slot has
    /// zero concurrency, or the factory fails.
    pub fn with_client_factory<F>(slots: Vec<BackendSlot>, factory: F) -> Result<Self, BackendError>
    where
        F: Fn(&BackendSlot) -> Result<reqwest::Client, BackendError>,
    {
        if slots.is_empty() {
            return Err(BackendError::new(
                ErrorKind::ConfigurationError,
                "pipeline requires at least one backend slot",
            ));
        }

        let mut runtimes = Vec::with_capacity(slots.len());
        for slot in slots {
            if slot.concurrency == 0 {
                return Err(BackendError::new(
                    ErrorKind::ConfigurationError,
                    format!("backend {} has zero concurrency", slot.backend.name()),
                ));
            }

            let client = factory(&slot)?;
            runtimes.push(SlotRuntime {
                name: slot.backend.name().to_string(),
                backend: slot.backend,
                hedging: slot.hedging,
                semaphore: Arc::new(Semaphore::new(slot.concurrency)),
                breaker: CircuitBreaker::new(slot.circuit_breaker),
                client: Mutex::new(Some(client)),
            });
        }

        Ok(Self {
            slots: runtimes,
            closed: AtomicBool::new(false),
            metrics: PipelineMetrics::default(),
        })
    }

    /// Produce a completion, falling through slots until one succeeds
    ///
    /// Never returns an `Err`; every failure is an error-kinded
    /// [`CompletionResult`].
    pub async fn complete(&self, request: CompletionRequest) -> CompletionResult {
        if self.closed.load(Ordering::SeqCst) {
            return CompletionResult::failure(ErrorKind::ConfigurationError, "pipeline has been shut down");
        }

        let start = Instant::now();
        let mut first_terminal: Option<CompletionResult> = None;
        let mut last: Option<CompletionResult> = None;

        for slot in &self.slots {
            if !slot.breaker.allow_request() {
                debug!(backend = %slot.name, "circuit open, skipping backend");
                last = Some(CompletionResult::failure(
                    ErrorKind::CircuitOpen,
                    format!("circuit open for backend {}", slot.name),
                ));
                continue;
            }

            let Some(client) = slot.client() else {
                return CompletionResult::failure(ErrorKind::ConfigurationError, "pipeline has been shut down");
            };

            let result = self.hedged_complete(slot, &request, client).await;

            if result.is_success() {
                slot.breaker.record_success();
                self.metrics.requests.add(
                    1,
                    &[
                        KeyValue::new("outcome", "success"),
                        KeyValue::new("backend", slot.name.clone()),
                    ],
                );
                record_duration(&self.metrics.request_duration, start, &[KeyValue::new(
                    "backend",
                    slot.name.clone(),
                )]);
                return result;
            }

            if slot.breaker.record_failure() {
                warn!(backend = %slot.name, "circuit breaker opened");
                self.metrics
                    .breaker_opens
                    .add(1, &[KeyValue::new("backend", slot.name.clone())]);
            }
            if let Some(kind) = result.kind() {
                warn!(backend = %slot.name, error = %kind, "backend failed, falling through");
            }

            if first_terminal.is_none()
                && let Some(kind) = result.kind()
                && !kind.is_transient()
            {
                first_terminal = Some(result.clone());
            }
            last = Some(result);
        }

        let outcome = first_terminal
            .or(last)
            .unwrap_or_else(|| CompletionResult::failure(ErrorKind::NoBackendAvailable, "no backend available"));
        self.metrics.requests.add(1, &[KeyValue::new("outcome", "failure")]);
        record_duration(&self.metrics.request_duration, start, &[]);
        outcome
    }

    /// Launch hedged attempts against one slot and return the best outcome
    ///
    /// Attempt `i > 0` sleeps `delay * i` before starting. Every attempt
    /// acquires the slot semaphore before calling the adapter, so in-flight
    /// work never exceeds the slot's concurrency. The first success aborts
    /// the remaining attempts; cancellation is swallowed.
    async fn hedged_complete(
        &self,
        slot: &SlotRuntime,
        request: &CompletionRequest,
        client: reqwest::Client,
    ) -> CompletionResult {
        let attempts = slot.hedging.hedges + 1;
        if slot.hedging.hedges > 0 {
            self.metrics
                .hedges
                .add(u64::from(slot.hedging.hedges), &[KeyValue::new("backend", slot.name.clone())]);
        }

        let mut set = JoinSet::new();
        for i in 0..attempts {
            let backend = Arc::clone(&slot.backend);
            let semaphore = Arc::clone(&slot.semaphore);
            let request = request.clone();
            let client = client.clone();
            let delay = slot.hedging.hedge_delay;

            set.spawn(async move {
                if i > 0 {
                    tokio::time::sleep(delay * i).await;
                }
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return CompletionResult::failure(ErrorKind::BackendError, "backend slot is closed");
                };
                backend.complete(&request, &BackendContext::new(client)).await
            });
        }

        let mut last: Option<CompletionResult> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) if result.is_success() => {
                    set.abort_all();
                    return result;
                }
                Ok(result) => last = Some(result),
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    last = Some(CompletionResult::failure(
                        ErrorKind::BackendError,
                        format!("attempt task failed: {e}"),
                    ));
                }
            }
        }

        last.unwrap_or_else(|| CompletionResult::failure(ErrorKind::BackendError, "no attempt produced a result"))
    }

    /// Stream completion chunks, falling through slots on failure
    ///
    /// Chunks are forwarded as they arrive. A slot that fails before or
    /// mid-stream records a breaker failure and the next slot is tried;
    /// chunks already forwarded are not rewound, so a fallover mid-stream
    /// can duplicate earlier content. When every slot fails the stream
    /// yields exactly one `Err` carrying the last failure.
    pub fn stream(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, BackendError>> + Send + '_>> {
        Box::pin(async_stream::stream! {
            if self.closed.load(Ordering::SeqCst) {
                yield Err(BackendError::new(ErrorKind::ConfigurationError, "pipeline has been shut down"));
                return;
            }

            let start = Instant::now();
            let mut last_error: Option<BackendError> = None;

            for slot in &self.slots {
                if !slot.breaker.allow_request() {
                    debug!(backend = %slot.name, "circuit open, skipping backend");
                    last_error = Some(BackendError::new(
                        ErrorKind::CircuitOpen,
                        format!("circuit open for backend {}", slot.name),
                    ));
                    continue;
                }

                let Some(client) = slot.client() else {
                    yield Err(BackendError::new(ErrorKind::ConfigurationError, "pipeline has been shut down"));
                    return;
                };

                let Ok(permit) = Arc::clone(&slot.semaphore).acquire_owned().await else {
                    last_error = Some(BackendError::new(ErrorKind::BackendError, "backend slot is closed"));
                    continue;
                };

                let context = BackendContext::new(client);
                let mut source = match slot.backend.stream(&request, &context).await {
                    Ok(source) => source,
                    Err(e) => {
                        drop(permit);
                        if slot.breaker.record_failure() {
                            warn!(backend = %slot.name, "circuit breaker opened");
                        }
                        warn!(backend = %slot.name, error = %e, "stream open failed, falling through");
                        last_error = Some(e);
                        continue;
                    }
                };

                let mut mid_stream_error: Option<BackendError> = None;
                while let Some(event) = source.next().await {
                    match event {
                        Ok(chunk) => yield Ok(chunk),
                        Err(e) => {
                            mid_stream_error = Some(e);
                            break;
                        }
                    }
                }
                drop(permit);

                match mid_stream_error {
                    None => {
                        slot.breaker.record_success();
                        self.metrics.requests.add(
                            1,
                            &[
                                KeyValue::new("outcome", "success"),
                                KeyValue::new("backend", slot.name.clone()),
                            ],
                        );
                        record_duration(&self.metrics.request_duration, start, &[KeyValue::new(
                            "backend",
                            slot.name.clone(),
                        )]);
                        return;
                    }
                    Some(e) => {
                        if slot.breaker.record_failure() {
                            warn!(backend = %slot.name, "circuit breaker opened");
                        }
                        warn!(backend = %slot.name, error = %e, "stream failed, falling through");
                        last_error = Some(e);
                    }
                }
            }

            self.metrics.requests.add(1, &[KeyValue::new("outcome", "failure")]);
            record_duration(&self.metrics.request_duration, start, &[]);
            yield Err(last_error.unwrap_or_else(|| {
                BackendError::new(ErrorKind::NoBackendAvailable, "no backend available")
            }));
        })
    }

    /// Shut the pipeline down, releasing transport clients exactly once
    ///
    /// Idempotent. Subsequent `complete` and `stream` calls fail fast with
    /// `configuration_error`.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for slot in &self.slots {
            slot.client.lock().unwrap_or_else(PoisonError::into_inner).take();
        }
        debug!("pipeline shut down");
    }
}
