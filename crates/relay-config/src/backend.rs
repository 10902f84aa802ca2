use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Configuration for a single upstream backend
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Backend protocol type
    #[serde(rename = "type")]
    pub backend_type: BackendType,
    /// Base URL of the upstream server
    pub base_url: Url,
    /// API key for authentication
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Maximum in-flight requests against this backend
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Per-request timeout (e.g. "120s")
    #[serde(default = "default_timeout")]
    pub timeout: String,
    /// Retry behavior for rate-limited requests
    #[serde(default)]
    pub retry: RetryConfig,
    /// Hedged dispatch configuration
    #[serde(default)]
    pub hedging: HedgingConfig,
    /// Circuit breaker configuration
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Supported backend protocols
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// KoboldCpp-compatible OpenAI-style API
    Kobold,
}

/// Retry configuration for a backend
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum retries per endpoint after a rate-limit response
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

/// Hedged dispatch configuration for a backend
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HedgingConfig {
    /// Extra attempts launched beyond the first
    #[serde(default)]
    pub hedges: u32,
    /// Delay before each additional hedge (e.g. "150ms")
    #[serde(default = "default_hedge_delay")]
    pub delay: String,
}

impl Default for HedgingConfig {
    fn default() -> Self {
        Self {
            hedges: 0,
            delay: default_hedge_delay(),
        }
    }
}

/// Circuit breaker configuration for a backend
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time the circuit stays open before requests are allowed again (e.g. "30s")
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout: default_reset_timeout(),
        }
    }
}

fn default_concurrency() -> usize {
    5
}
fn default_timeout() -> String {
    "120s".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_hedge_delay() -> String {
    "150ms".to_string()
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout() -> String {
    "30s".to_string()
}
