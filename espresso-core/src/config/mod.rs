//! Configuration for Espresso applications
//!
//! Values are resolved in this order (highest priority wins):
//!
//! 1. **Code**: builder calls on the [`Application`](crate::Application)
//! 2. **Environment variables**: `ESPRESSO_*`
//! 3. **Config file**: `espresso.toml`
//! 4. **Defaults**
//!
//! ```no_run
//! use espresso_core::config::EspressoConfig;
//!
//! let config = EspressoConfig::load()?;
//! config.validate()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod compression;
pub mod logging;
pub mod server;

pub use compression::CompressionConfig;
pub use logging::LoggingConfig;
pub use server::ServerConfig;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EspressoConfig {
    pub server: ServerConfig,
    pub compression: CompressionConfig,
    /// Only applied when present in the file; see [`EspressoConfig::logging_configured`]
    pub logging: Option<LoggingConfig>,
}

impl EspressoConfig {
    /// Defaults, then `espresso.toml` if it exists, then the environment
    pub fn load() -> Result<Self> {
        Self::load_from("espresso.toml")
    }

    /// Defaults, then `path` if it exists, then the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::default();

        if path.exists() {
            let file_config = Self::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.merge(file_config);
        }

        config.apply_env_vars();
        Ok(config)
    }

    /// Parse a TOML file; missing sections and keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.as_ref().display()))
    }

    /// Merge another config into this one (other takes priority)
    pub fn merge(&mut self, other: Self) {
        self.server.merge(other.server);
        self.compression.merge(other.compression);
        if let Some(logging) = other.logging {
            self.logging.get_or_insert_with(LoggingConfig::default).merge(logging);
        }
    }

    pub fn apply_env_vars(&mut self) {
        self.server.apply_env_vars();
        self.compression.apply_env_vars();

        let mut logging = self.logging.clone().unwrap_or_default();
        logging.apply_env_vars();
        if self.logging.is_some() || logging != LoggingConfig::default() {
            self.logging = Some(logging);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.compression.validate()?;
        if let Some(logging) = &self.logging {
            logging.validate()?;
        }
        Ok(())
    }

    /// Whether a `[logging]` section or `ESPRESSO_LOG_*` variable asked for
    /// the built-in logger
    pub fn logging_configured(&self) -> bool {
        self.logging.is_some()
    }
}
