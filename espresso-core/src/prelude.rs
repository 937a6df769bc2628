//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use espresso_core::prelude::*;
//! ```

// === Application ===
pub use crate::app::{AppEvent, Application, Controller, ErrorContext, ListenOptions, Listener, ServerHandle};

// === Configuration ===
pub use crate::config::EspressoConfig;
pub use crate::logging::{init_logging, LoggingConfig};

// === Errors ===
pub use crate::error::{Error, RequestValidationError, Result, ValidationIssue};

// === Request / response ===
pub use crate::http::{
    Body, CompressionOptions, Encoding, FileHeaders, Parser, Request, Response, Route, SendFileOptions,
    SendOptions,
};

// === Ready-made routes ===
pub use crate::factory::{
    health_route, info_route, spa_route, HealthCheckConfig, HealthOptions, InfoOptions, SpaOptions,
};

// === HTTP essentials (re-exported from the `http` crate) ===
pub use http::{Method, StatusCode};
