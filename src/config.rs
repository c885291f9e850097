//! Runtime configuration

use crate::orchestrator::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level flowmux configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FlowmuxConfig {
    /// Store database path; defaults to the user config directory
    pub store_path: Option<PathBuf>,

    /// Cadence of the async step drain loop, in seconds
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,

    /// How often the engine re-checks an in-flight async dependency
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Base delay before the first retry of a transient failure
    #[serde(default = "default_retry_initial_delay_secs")]
    pub retry_initial_delay_secs: u64,

    /// Cap on the delay between retry attempts
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,
}

fn default_drain_interval_secs() -> u64 {
    5
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_retry_initial_delay_secs() -> u64 {
    2
}

fn default_retry_max_delay_secs() -> u64 {
    60
}

impl Default for FlowmuxConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            drain_interval_secs: default_drain_interval_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_initial_delay_secs: default_retry_initial_delay_secs(),
            retry_max_delay_secs: default_retry_max_delay_secs(),
        }
    }
}

impl FlowmuxConfig {
    /// Load configuration from an explicit path or the default location.
    ///
    /// A missing file yields the defaults; a present but malformed file is an
    /// error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    /// Default config file path under the user config directory
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(config_dir.join("flowmux").join("config.toml"))
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_secs(self.retry_initial_delay_secs),
            max_delay: Duration::from_secs(self.retry_max_delay_secs),
            ..Default::default()
        }
    }
}
