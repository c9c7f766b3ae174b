//! Advisor configuration

use advisor_lib::ProvisionConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file used when `ADVISOR_CONFIG_FILE` is not set
pub const DEFAULT_CONFIG_FILE: &str = "/etc/qos-advisor/config.toml";

/// Advisor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AdvisorConfig {
    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics and region updates
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Age in seconds after which a pushed indicator reading is ignored
    #[serde(default = "default_indicator_staleness")]
    pub indicator_staleness_secs: u64,

    #[serde(default)]
    pub provision: ProvisionConfig,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_indicator_staleness() -> u64 {
    30
}

impl AdvisorConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("ADVISOR_CONFIG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    /// Load from `path` (optional) layered with `ADVISOR__*` variables,
    /// e.g. `ADVISOR__API_PORT=9090`
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("ADVISOR").separator("__"))
            .build()
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;

        let parsed: AdvisorConfig = config
            .try_deserialize()
            .context("invalid advisor configuration")?;
        parsed
            .provision
            .validate()
            .context("invalid provisioning configuration")?;

        Ok(parsed)
    }

    pub fn indicator_staleness(&self) -> Duration {
        Duration::from_secs(self.indicator_staleness_secs)
    }
}
