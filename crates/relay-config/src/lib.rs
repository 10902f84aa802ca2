#![allow(clippy::must_use_candidate)]

pub mod backend;
mod env;
mod loader;
pub mod telemetry;

use indexmap::IndexMap;
use serde::Deserialize;

pub use backend::*;
pub use telemetry::{ExportProtocol, ExporterConfig, TelemetryConfig};

/// Top-level Relay configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Backend configurations keyed by name, in fallback order
    #[serde(default)]
    pub backends: IndexMap<String, BackendConfig>,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}
