//! Response compression configuration

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;

use crate::http::compression::{CompressionOptions, Encoding};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Env: ESPRESSO_COMPRESSION
    /// Default: true
    pub enabled: bool,

    /// Smallest known body length worth compressing
    /// Env: ESPRESSO_COMPRESSION_MIN
    /// Default: 1024
    pub min_bytes: u64,

    /// Server preference order (`br`, `gzip`, `deflate`)
    pub encodings: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_bytes: 1024,
            encodings: vec!["br".to_string(), "gzip".to_string(), "deflate".to_string()],
        }
    }
}

impl CompressionConfig {
    pub fn merge(&mut self, other: Self) {
        *self = other;
    }

    pub fn apply_env_vars(&mut self) {
        if let Ok(enabled) = env::var("ESPRESSO_COMPRESSION") {
            self.enabled = !(enabled == "0" || enabled.eq_ignore_ascii_case("false"));
        }
        if let Ok(min) = env::var("ESPRESSO_COMPRESSION_MIN") {
            if let Ok(m) = min.parse() {
                self.min_bytes = m;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        for name in &self.encodings {
            if name.parse::<Encoding>().is_err() {
                bail!("Unsupported compression encoding: {}", name);
            }
        }
        if self.enabled && self.encodings.is_empty() {
            bail!("Compression is enabled but no encodings are configured");
        }
        Ok(())
    }

    /// Compression options, `None` when compression is disabled
    pub fn to_options(&self) -> Option<CompressionOptions> {
        if !self.enabled {
            return None;
        }
        let encodings = self.encodings.iter().filter_map(|name| name.parse().ok()).collect();
        Some(CompressionOptions::default().min_bytes(self.min_bytes).encodings(encodings))
    }
}
