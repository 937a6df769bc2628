//! Server configuration

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening address
    /// Env: ESPRESSO_HOST
    /// Default: "127.0.0.1"
    pub host: String,

    /// Listening port
    /// Env: ESPRESSO_PORT
    /// Default: 8080
    pub port: u16,

    /// Largest request body a parser will read, in bytes
    /// Env: ESPRESSO_MAX_BODY_SIZE
    /// Default: 10485760 (10MB)
    pub max_body_size: usize,

    /// Seconds open connections get to finish after `close`
    /// Env: ESPRESSO_SHUTDOWN_GRACE
    /// Default: 10
    pub shutdown_grace_secs: u64,

    /// Log one JSON line per request
    /// Env: ESPRESSO_ACCESS_LOG
    /// Default: false
    pub access_log: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_body_size: 10 * 1024 * 1024, // 10MB
            shutdown_grace_secs: 10,
            access_log: false,
        }
    }
}

impl ServerConfig {
    /// Merge another config into this one (other takes priority)
    pub fn merge(&mut self, other: Self) {
        self.host = other.host;
        self.port = other.port;
        self.max_body_size = other.max_body_size;
        self.shutdown_grace_secs = other.shutdown_grace_secs;
        self.access_log = other.access_log;
    }

    /// Apply environment variables
    pub fn apply_env_vars(&mut self) {
        if let Ok(host) = env::var("ESPRESSO_HOST") {
            self.host = host;
        }

        if let Ok(port) = env::var("ESPRESSO_PORT") {
            if let Ok(p) = port.parse() {
                self.port = p;
            }
        }

        if let Ok(size) = env::var("ESPRESSO_MAX_BODY_SIZE") {
            if let Ok(s) = size.parse() {
                self.max_body_size = s;
            }
        }

        if let Ok(grace) = env::var("ESPRESSO_SHUTDOWN_GRACE") {
            if let Ok(g) = grace.parse() {
                self.shutdown_grace_secs = g;
            }
        }

        if let Ok(enabled) = env::var("ESPRESSO_ACCESS_LOG") {
            self.access_log = enabled == "1" || enabled.eq_ignore_ascii_case("true");
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("Invalid port: port must be between 1 and 65535");
        }

        if self.host.is_empty() {
            bail!("Invalid host: host cannot be empty");
        }

        if self.max_body_size == 0 {
            bail!("Invalid max_body_size: must be greater than 0");
        }

        Ok(())
    }

    pub fn shutdown_grace(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.shutdown_grace_secs)
    }
}
