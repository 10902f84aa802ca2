use std::path::PathBuf;

use clap::Parser;

/// Relay completion dispatcher
#[derive(Debug, Parser)]
#[command(name = "relay", about = "Resilient dispatch for LLM completion backends")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.toml", env = "RELAY_CONFIG")]
    pub config: PathBuf,

    /// Prompt to complete
    pub prompt: String,

    /// Stream chunks as they arrive instead of waiting for the full completion
    #[arg(long)]
    pub stream: bool,

    /// Maximum tokens to generate
    #[arg(long, default_value_t = 256)]
    pub max_tokens: u32,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.7)]
    pub temperature: f64,

    /// Nucleus sampling threshold
    #[arg(long, default_value_t = 1.0)]
    pub top_p: f64,

    /// Print the full result as JSON instead of plain text
    #[arg(long)]
    pub json: bool,
}
