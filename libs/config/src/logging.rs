//! Tracing subscriber setup shared by binaries and benches.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of the human readable format
    pub json: bool,

    /// Include the thread name (lanes run on `exec-group-<i>`)
    pub with_thread_names: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            with_thread_names: true,
        }
    }
}

impl LoggingSettings {
    /// `RUST_LOG` wins over the configured level
    pub fn env_filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level)
                .map_err(|e| anyhow!("invalid log level '{}': {}", self.level, e)),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(settings: &LoggingSettings) -> Result<()> {
    let filter = settings.env_filter()?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(settings.with_thread_names)
        .with_target(false);

    if settings.json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow!("failed to install subscriber: {}", e))
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow!("failed to install subscriber: {}", e))
    }
}
