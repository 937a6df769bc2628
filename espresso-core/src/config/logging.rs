//! Logging configuration

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;

use crate::logging::{LogFormat, LogLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `error`, `warn`, `info`, `debug` or `trace`
    /// Env: ESPRESSO_LOG_LEVEL
    /// Default: "info"
    pub level: String,

    /// `human`, `json` or `logfmt`
    /// Env: ESPRESSO_LOG_FORMAT
    /// Default: "human"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "human".to_string() }
    }
}

impl LoggingConfig {
    pub fn merge(&mut self, other: Self) {
        *self = other;
    }

    pub fn apply_env_vars(&mut self) {
        if let Ok(level) = env::var("ESPRESSO_LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(format) = env::var("ESPRESSO_LOG_FORMAT") {
            self.format = format;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.level.parse::<LogLevel>().map_err(|e| anyhow!("Invalid logging.level: {}", e))?;
        self.format.parse::<LogFormat>().map_err(|e| anyhow!("Invalid logging.format: {}", e))?;
        Ok(())
    }

    /// Logger settings for [`init_logging`](crate::logging::init_logging)
    pub fn to_logging_config(&self) -> Result<crate::logging::LoggingConfig> {
        let level = self.level.parse::<LogLevel>().map_err(|e| anyhow!(e))?;
        let format = self.format.parse::<LogFormat>().map_err(|e| anyhow!(e))?;
        Ok(crate::logging::LoggingConfig::default().with_level(level).with_format(format))
    }
}
