//! Process-wide logging
//!
//! Everything in the crate logs through the standard `log` macros. This
//! module provides the logger behind them: a level, one or more stdout or
//! stderr outputs, a line format and context fields added to every entry.
//!
//! ```rust,no_run
//! use espresso_core::logging::{init_logging, LogFormat, LoggingConfig};
//!
//! let config = LoggingConfig::production()
//!     .with_stderr(LogFormat::Logfmt)
//!     .with_context_field("service", "catalog");
//! init_logging(&config).unwrap();
//!
//! log::info!("Server starting on port {}", 8080);
//! ```
//!
//! Applications that configure nothing here get `env_logger` (driven by
//! `RUST_LOG`) the first time they listen.

pub mod config;
pub mod destinations;
pub mod formatter;

pub use config::{LogLevel, LoggingConfig};
pub use destinations::{LogEntry, LogOutput};
pub use formatter::LogFormat;

use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Install the logger
///
/// Only the first call in a process has an effect. It fails when another
/// logger was installed before it.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = init_logging_internal(config);
    });
    result
}

fn init_logging_internal(config: &LoggingConfig) -> anyhow::Result<()> {
    let logger = EspressoLogger::new(config.clone());
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(config.level.to_level_filter());
    Ok(())
}

struct EspressoLogger {
    config: LoggingConfig,
    writers: Vec<Writer>,
}

enum Writer {
    Stdout(LogFormat),
    Stderr(LogFormat),
}

impl EspressoLogger {
    fn new(config: LoggingConfig) -> Self {
        let mut writers = config
            .outputs
            .iter()
            .map(|output| {
                let format = output.format(&config.format).clone();
                match output {
                    LogOutput::Stdout { .. } => Writer::Stdout(format),
                    LogOutput::Stderr { .. } => Writer::Stderr(format),
                }
            })
            .collect::<Vec<_>>();

        if writers.is_empty() {
            writers.push(Writer::Stdout(config.format.clone()));
        }

        Self { config, writers }
    }
}

impl log::Log for EspressoLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::from(self.config.level)
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let entry = LogEntry::from_log_record(record, &self.config);
        for writer in &self.writers {
            // A closed pipe must not take the process down with it.
            let _ = match writer {
                Writer::Stdout(format) => writeln!(std::io::stdout().lock(), "{}", format.format_entry(&entry)),
                Writer::Stderr(format) => writeln!(std::io::stderr().lock(), "{}", format.format_entry(&entry)),
            };
        }
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
    }
}
