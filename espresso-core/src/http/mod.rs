//! HTTP building blocks
//!
//! - [`path`] / [`router`] - route templates and the trie that matches them
//! - [`request`] / [`response`] - per-request facades handed to handlers
//! - [`compression`] / [`conditional`] - negotiated encodings and `304`s
//! - [`parser`] - content-type driven body parsers

pub mod body;
pub mod compression;
pub mod conditional;
pub mod parser;
pub mod path;
pub mod request;
pub mod response;
pub mod route;
pub mod router;

mod send;
mod send_file;

use serde::Serialize;

use crate::error::ValidationIssue;

pub use body::{Body, ByteStream, ResponseBody};
pub use compression::{CompressionOptions, CompressionProvider, Encoding};
pub use conditional::{format_http_date, is_modified, parse_http_date};
pub use parser::{BodyReader, FnParser, FormParser, JsonParser, Parser, TextParser};
pub use path::{parse_path_template, PathTemplateError, PathToken};
pub use request::Request;
pub use response::{FileHeaders, NotFound, Response, SendFileOptions, SendOptions};
pub use route::{IntoStrings, Route, RouteHandler};
pub use router::{PathParams, RouteMatch, Router};

/// JSON body of the framework's own error responses
#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody<'a> {
    pub error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issues: Option<&'a [ValidationIssue]>,
}

pub(crate) const NOT_FOUND_BODY: ErrorBody<'static> = ErrorBody { error: "Not Found", issues: None };
pub(crate) const FORBIDDEN_BODY: ErrorBody<'static> = ErrorBody { error: "Forbidden", issues: None };
pub(crate) const INTERNAL_ERROR_BODY: ErrorBody<'static> =
    ErrorBody { error: "Internal Server Error", issues: None };

pub(crate) fn invalid_request_body(issues: &[ValidationIssue]) -> ErrorBody<'_> {
    ErrorBody { error: "Invalid Request", issues: Some(issues) }
}
