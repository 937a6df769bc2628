//! Line formats

use std::fmt;
use std::str::FromStr;

use crate::logging::destinations::LogEntry;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// `{"timestamp":"2024-01-15T10:30:00+00:00","level":"INFO","message":"listening","target":"espresso::app"}`
    Json,
    /// `2024-01-15 10:30:00.000 INFO  [espresso::app] listening`
    Human,
    /// `timestamp=2024-01-15T10:30:00+00:00 level=INFO target=espresso::app message="listening"`
    Logfmt,
}

impl LogFormat {
    pub fn format_entry(&self, entry: &LogEntry) -> String {
        match self {
            LogFormat::Json => format_json(entry),
            LogFormat::Human => format_human(entry),
            LogFormat::Logfmt => format_logfmt(entry),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Json => "json",
            LogFormat::Human => "human",
            LogFormat::Logfmt => "logfmt",
        })
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "human" | "text" | "pretty" => Ok(LogFormat::Human),
            "logfmt" => Ok(LogFormat::Logfmt),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

fn format_json(entry: &LogEntry) -> String {
    let mut json = serde_json::Map::new();
    json.insert("timestamp".to_string(), entry.timestamp.to_rfc3339().into());
    json.insert("level".to_string(), entry.level.as_str().into());
    json.insert("message".to_string(), entry.message.clone().into());
    json.insert("target".to_string(), entry.target.clone().into());

    if let Some(location) = &entry.location {
        json.insert("file".to_string(), location.file.clone().into());
        json.insert("line".to_string(), location.line.into());
    }
    for (key, value) in &entry.fields {
        json.insert(key.clone(), value.clone());
    }

    serde_json::Value::Object(json).to_string()
}

fn format_human(entry: &LogEntry) -> String {
    let mut line = format!(
        "{} {:5} [{}] {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        entry.level.as_str(),
        entry.target,
        entry.message
    );
    for (key, value) in &entry.fields {
        line.push_str(&format!(" {}={}", key, plain(value)));
    }
    line
}

fn format_logfmt(entry: &LogEntry) -> String {
    let mut parts = vec![
        format!("timestamp={}", entry.timestamp.to_rfc3339()),
        format!("level={}", entry.level.as_str()),
        format!("target={}", entry.target),
        format!("message={}", quoted(&entry.message)),
    ];

    if let Some(location) = &entry.location {
        parts.push(format!("file={}", quoted(&location.file)));
        parts.push(format!("line={}", location.line));
    }
    for (key, value) in &entry.fields {
        let value = match value {
            serde_json::Value::Number(_) | serde_json::Value::Bool(_) => value.to_string(),
            _ => quoted(&plain(value)),
        };
        parts.push(format!("{}={}", key, value));
    }

    parts.join(" ")
}

fn plain(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\\\""))
}
