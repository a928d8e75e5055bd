//! Gateway configuration
//!
//! Layered: built-in defaults, then an optional YAML file, then
//! `GPUFLEET_`-prefixed environment variables. The `fleetd` CLI applies its
//! own overrides on top.

use fleet_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the gateway daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind address for the HTTP server
    pub bind_address: String,

    /// HTTP port
    pub port: u16,

    /// Path of the persisted state snapshot; in-memory only when unset
    pub state_path: Option<PathBuf>,

    /// Base64 master key override; falls back to the persisted KMS state,
    /// else a key is generated and persisted on first start
    pub master_key: Option<String>,

    /// Seconds between idle auto-shutdown sweeps
    pub idle_sweep_interval_secs: u64,

    /// Health checks attempted during instance warmup
    pub warmup_max_checks: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8788,
            state_path: None,
            master_key: None,
            idle_sweep_interval_secs: 60,
            warmup_max_checks: 3,
        }
    }
}

impl GatewayConfig {
    /// Load configuration with precedence: defaults, then a config file
    /// (`GPUFLEET_CONFIG`, `./gpufleet.yaml`, `/etc/gpufleet/config.yaml`),
    /// then `GPUFLEET_`-prefixed environment variables.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&Self::default())
                .map_err(|e| Error::internal(e.to_string()))?,
        );

        if let Ok(path) = std::env::var("GPUFLEET_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path).required(false));
        } else {
            for path in &["./gpufleet.yaml", "/etc/gpufleet/config.yaml"] {
                builder = builder.add_source(config::File::with_name(path).required(false));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("GPUFLEET")
                .separator("__")
                .try_parsing(true),
        );

        let parsed: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::validation(format!("invalid configuration: {}", e)))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Load configuration from a specific file over the defaults
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let parsed: Self = config::Config::builder()
            .add_source(
                config::Config::try_from(&Self::default())
                    .map_err(|e| Error::internal(e.to_string()))?,
            )
            .add_source(config::File::from(path))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::validation(format!("invalid configuration: {}", e)))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::validation("port must be greater than 0"));
        }
        if self.bind_address.trim().is_empty() {
            return Err(Error::validation("bind address must not be empty"));
        }
        if self.idle_sweep_interval_secs == 0 {
            return Err(Error::validation(
                "idle sweep interval must be greater than 0",
            ));
        }
        if self.warmup_max_checks == 0 {
            return Err(Error::validation("warmup checks must be greater than 0"));
        }
        Ok(())
    }

    /// Socket address string to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr(), "127.0.0.1:8788");
        assert!(config.state_path.is_none());
    }

    #[test]
    fn test_validation_catches_bad_values() {
        let mut config = GatewayConfig::default();
        config.port = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.idle_sweep_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.warmup_max_checks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gpufleet.yaml");
        std::fs::write(&path, "port: 9100\nwarmup_max_checks: 5\n").unwrap();

        let config = GatewayConfig::load_from_file(&path).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.warmup_max_checks, 5);
        // Unspecified fields keep their defaults
        assert_eq!(config.bind_address, "127.0.0.1");
    }
}
