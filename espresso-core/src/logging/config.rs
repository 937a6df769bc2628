//! Logger settings

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::logging::{LogFormat, LogOutput};

/// How the process-wide logger behaves
#[derive(Clone, Debug, PartialEq)]
pub struct LoggingConfig {
    /// Minimum level written
    pub level: LogLevel,
    /// Where entries go; stdout when empty
    pub outputs: Vec<LogOutput>,
    /// Format for outputs that don't pick their own
    pub format: LogFormat,
    /// Fields added to every entry
    pub context_fields: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            outputs: vec![LogOutput::Stdout { format: None }],
            format: LogFormat::Human,
            context_fields: BTreeMap::new(),
        }
    }
}

/// Log levels, most severe first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    pub fn to_level_filter(self) -> log::LevelFilter {
        log::Level::from(self).to_level_filter()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => LogLevel::Error,
            log::Level::Warn => LogLevel::Warn,
            log::Level::Info => LogLevel::Info,
            log::Level::Debug => LogLevel::Debug,
            log::Level::Trace => LogLevel::Trace,
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

impl LoggingConfig {
    /// JSON lines on stdout at `info`
    pub fn production() -> Self {
        Self {
            level: LogLevel::Info,
            outputs: vec![LogOutput::Stdout { format: None }],
            format: LogFormat::Json,
            context_fields: BTreeMap::new(),
        }
    }

    /// Human readable lines on stdout at `debug`
    pub fn development() -> Self {
        Self { level: LogLevel::Debug, ..Self::default() }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_context_field(mut self, key: &str, value: &str) -> Self {
        self.context_fields.insert(key.to_string(), value.to_string());
        self
    }

    /// Write to stderr only
    pub fn to_stderr(mut self) -> Self {
        self.outputs = vec![LogOutput::Stderr { format: None }];
        self
    }

    /// Add a stdout output with its own format
    pub fn with_stdout(mut self, format: LogFormat) -> Self {
        self.outputs.push(LogOutput::Stdout { format: Some(format) });
        self
    }

    /// Add a stderr output with its own format
    pub fn with_stderr(mut self, format: LogFormat) -> Self {
        self.outputs.push(LogOutput::Stderr { format: Some(format) });
        self
    }
}
