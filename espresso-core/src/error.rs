//! Error taxonomy for Espresso
//!
//! Three kinds of failure travel through a request:
//!
//! - [`RequestValidationError`] - the request itself is malformed (bad body,
//!   wrong query types, ...). Always answered with a `400`.
//! - [`Failure`] - the value a wrapped route handler hands back to the
//!   enclosing scope. It carries the cause plus whether some error handler
//!   already touched it, so outer scopes know whether to log.
//! - everything else - unexpected, answered with a `500`.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::http::path::PathTemplateError;

/// Boxed error type used at stream and parser boundaries
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main result type for the framework
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Espresso
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request failed validation (mapped to `400 Bad Request`)
    #[error(transparent)]
    Validation(#[from] RequestValidationError),

    /// Status or headers were mutated after the response was dispatched
    #[error("response has already been sent")]
    AlreadySent,

    /// A route path template could not be parsed
    #[error(transparent)]
    Template(#[from] PathTemplateError),

    /// The application was closed and can no longer listen
    #[error("application is closed")]
    Closed,

    /// File system or socket failure
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Connection level failure reported by hyper
    #[error(transparent)]
    Hyper(#[from] hyper::Error),

    /// Invalid header name or value
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Any other error raised by application code
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Wrap an arbitrary error raised by application code
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Other(anyhow::Error::new(error))
    }

    /// Build an error from a plain message
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Error::Other(anyhow::Error::msg(message))
    }

    /// Validation details, if this is a request validation failure
    pub fn as_validation(&self) -> Option<&RequestValidationError> {
        match self {
            Error::Validation(error) => Some(error),
            _ => None,
        }
    }

    /// Downcast an application error raised through [`Error::other`] or `anyhow`
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Error::Other(error) => error.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(error: http::header::InvalidHeaderValue) -> Self {
        Error::InvalidHeader(error.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(error: http::header::InvalidHeaderName) -> Self {
        Error::InvalidHeader(error.to_string())
    }
}

/// One machine-readable problem found in a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub message: String,
    pub path: Vec<String>,
}

impl ValidationIssue {
    pub fn new(message: impl Into<String>, path: &[&str]) -> Self {
        Self { message: message.into(), path: path.iter().map(|p| p.to_string()).collect() }
    }
}

/// Structured request validation failure
///
/// Serialised into the `400` response as
/// `{"error":"Invalid Request","issues":[{"message":..,"path":[..]}]}`.
#[derive(Debug, Clone)]
pub struct RequestValidationError {
    issues: Vec<ValidationIssue>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl RequestValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues, source: None }
    }

    /// Attach the underlying cause (parser or deserializer error)
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(Arc::from(source.into()));
        self
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }
}

impl fmt::Display for RequestValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid request")?;
        for issue in &self.issues {
            write!(f, "; {} at [{}]", issue.message, issue.path.join("."))?;
        }
        Ok(())
    }
}

impl std::error::Error for RequestValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Outcome of a wrapped route handler that did not recover
///
/// Controllers return this instead of the bare error so that an enclosing
/// controller, or the application, can tell whether any error handler has
/// already seen the error.
#[derive(Debug, Clone)]
pub struct Failure {
    pub error: Arc<Error>,
    pub handled: bool,
}

impl Failure {
    /// A fresh, untouched failure
    pub fn new(error: Error) -> Self {
        Self { error: Arc::new(error), handled: false }
    }
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Failure::new(error)
    }
}
