//! Log outputs and the entries written to them

use std::collections::BTreeMap;

use crate::logging::{LogFormat, LogLevel, LoggingConfig};

/// Where entries are written
#[derive(Clone, Debug, PartialEq)]
pub enum LogOutput {
    Stdout {
        /// Overrides the configured format
        format: Option<LogFormat>,
    },
    Stderr {
        /// Overrides the configured format
        format: Option<LogFormat>,
    },
}

impl LogOutput {
    pub fn format<'a>(&'a self, default: &'a LogFormat) -> &'a LogFormat {
        match self {
            LogOutput::Stdout { format } | LogOutput::Stderr { format } => format.as_ref().unwrap_or(default),
        }
    }
}

/// One formatted-to-be log line
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Usually the module path
    pub target: String,
    pub fields: BTreeMap<String, serde_json::Value>,
    pub location: Option<LogLocation>,
}

#[derive(Debug, Clone)]
pub struct LogLocation {
    pub file: String,
    pub line: u32,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            level,
            message: message.into(),
            target: target.into(),
            fields: BTreeMap::new(),
            location: None,
        }
    }

    /// Build an entry from a `log` record plus the configured context fields
    pub fn from_log_record(record: &log::Record, config: &LoggingConfig) -> Self {
        let mut entry = Self::new(record.level().into(), record.args().to_string(), record.target());

        if let (Some(file), Some(line)) = (record.file(), record.line()) {
            entry.location = Some(LogLocation { file: file.to_string(), line });
        }
        for (key, value) in &config.context_fields {
            entry.fields.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        entry
    }

    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_creation() {
        let entry = LogEntry::new(LogLevel::Info, "listening", "espresso::app").with_field("port", 8080);

        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.message, "listening");
        assert_eq!(entry.fields.get("port"), Some(&serde_json::json!(8080)));
    }

    #[test]
    fn test_context_fields_are_copied() {
        let config = LoggingConfig::default().with_context_field("service", "catalog");
        let entry = LogEntry::from_log_record(
            &log::Record::builder()
                .level(log::Level::Warn)
                .target("espresso::http")
                .args(format_args!("slow"))
                .file(Some("src/http/send.rs"))
                .line(Some(12))
                .build(),
            &config,
        );

        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.fields.get("service"), Some(&serde_json::json!("catalog")));
        assert_eq!(entry.location.map(|l| l.line), Some(12));
    }

    #[test]
    fn test_output_format_override() {
        let json = LogFormat::Json;
        assert_eq!(LogOutput::Stdout { format: None }.format(&json), &LogFormat::Json);
        assert_eq!(LogOutput::Stderr { format: Some(LogFormat::Logfmt) }.format(&json), &LogFormat::Logfmt);
    }
}
