use std::path::Path;

use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        let expanded =
            crate::env::expand_env(&raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error if no backends are configured or a backend
    /// configuration is invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backends.is_empty() {
            anyhow::bail!("at least one backend must be configured");
        }

        for (name, backend) in &self.backends {
            if backend.concurrency == 0 {
                anyhow::bail!("backend '{name}': concurrency must be at least 1");
            }

            duration_str::parse(&backend.timeout)
                .map_err(|e| anyhow::anyhow!("backend '{name}': invalid timeout '{}': {e}", backend.timeout))?;
            duration_str::parse(&backend.hedging.delay)
                .map_err(|e| anyhow::anyhow!("backend '{name}': invalid hedge delay '{}': {e}", backend.hedging.delay))?;
            duration_str::parse(&backend.circuit_breaker.reset_timeout).map_err(|e| {
                anyhow::anyhow!(
                    "backend '{name}': invalid reset timeout '{}': {e}",
                    backend.circuit_breaker.reset_timeout
                )
            })?;
        }

        Ok(())
    }
}
