//! Request facade
//!
//! A [`Request`] is a cheap, cloneable handle over one inbound request. Views
//! that need work (URL, query parameters, cookies, parsed body) are computed
//! on first use and memoised for the lifetime of the request.
//!
//! Typed views deserialise the raw view into any `serde` type and report a
//! mismatch as a [`RequestValidationError`], which the pipeline answers with
//! a `400`.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use http::{HeaderMap, Method, Uri, Version};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, OnceCell};
use url::Url;

use super::body::RequestBody;
use super::parser::{default_parsers, group_pairs, media_type, BodyReader, ParserMap, DEFAULT_PARSER_KEY};
use super::router::PathParams;
use crate::error::{Error, RequestValidationError, Result, ValidationIssue};

/// Default upper bound for a parsed request body (10 MiB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Per-listener settings a request needs to parse itself
#[derive(Clone)]
pub(crate) struct RequestContext {
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub parsers: Arc<ParserMap>,
    pub max_body_size: usize,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            local_addr: None,
            remote_addr: None,
            parsers: Arc::new(default_parsers()),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

struct RequestInner {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    context: RequestContext,
    body: Mutex<Option<RequestBody>>,
    url: OnceLock<Option<Url>>,
    query: OnceLock<Value>,
    cookies: OnceLock<HashMap<String, String>>,
    path_params: OnceLock<PathParams>,
    parsed_body: OnceCell<std::result::Result<Value, RequestValidationError>>,
}

/// One inbound HTTP request
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.inner.method)
            .field("uri", &self.inner.uri)
            .field("version", &self.inner.version)
            .finish_non_exhaustive()
    }
}

impl Request {
    pub(crate) fn new(parts: http::request::Parts, body: RequestBody, context: RequestContext) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                method: parts.method,
                uri: parts.uri,
                version: parts.version,
                headers: parts.headers,
                context,
                body: Mutex::new(Some(body)),
                url: OnceLock::new(),
                query: OnceLock::new(),
                cookies: OnceLock::new(),
                path_params: OnceLock::new(),
                parsed_body: OnceCell::new(),
            }),
        }
    }

    /// Wrap a plain `http::Request`, using the default parsers
    ///
    /// Handy for exercising handlers without a listener.
    pub fn from_http<B>(request: http::Request<B>) -> Self
    where
        B: http_body::Body<Data = bytes::Bytes> + Send + 'static,
        B::Error: Into<crate::error::BoxError>,
    {
        let (parts, body) = request.into_parts();
        Self::new(parts, body.map_err(Into::into).boxed_unsync(), RequestContext::default())
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn version(&self) -> Version {
        self.inner.version
    }

    /// Always `http`; TLS is terminated in front of Espresso
    pub fn protocol(&self) -> &'static str {
        "http"
    }

    /// The raw request target
    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    /// Absolute URL of the request
    ///
    /// The authority is the local socket address when known, otherwise the
    /// `Host` header.
    pub fn url(&self) -> Option<&Url> {
        self.inner
            .url
            .get_or_init(|| {
                let authority = match self.inner.context.local_addr {
                    Some(addr) => addr.to_string(),
                    None => self.header("host").unwrap_or("localhost").to_string(),
                };
                let target = self.inner.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
                Url::parse(&format!("{}://{}{}", self.protocol(), authority, target)).ok()
            })
            .as_ref()
    }

    /// Normalised path, always starting with `/`
    pub fn path(&self) -> &str {
        match self.url() {
            Some(url) => url.path(),
            None => self.inner.uri.path(),
        }
    }

    /// `""` or the query string including its leading `?`
    pub fn query(&self) -> String {
        let query = match self.url() {
            Some(url) => url.query(),
            None => self.inner.uri.query(),
        };
        match query {
            Some(q) if !q.is_empty() => format!("?{}", q),
            _ => String::new(),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// First value of a header, if it is valid text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.context.remote_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.context.local_addr
    }

    pub(crate) fn set_path_params(&self, params: PathParams) {
        // Installed once by the listener; a second match can't happen
        let _ = self.inner.path_params.set(params);
    }

    /// Decoded value of one path parameter
    pub fn path_parameter(&self, name: &str) -> Option<&str> {
        self.inner.path_params.get().and_then(|p| p.get(name)).map(String::as_str)
    }

    /// Path parameters deserialised into `T`
    pub fn path_parameters<T: DeserializeOwned>(&self) -> Result<T> {
        let value = match self.inner.path_params.get() {
            Some(params) => {
                Value::Object(params.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect())
            }
            None => Value::Object(Map::new()),
        };
        validate(value, "path")
    }

    fn query_value(&self) -> &Value {
        self.inner.query.get_or_init(|| {
            let query = match self.url() {
                Some(url) => url.query().unwrap_or("").to_string(),
                None => self.inner.uri.query().unwrap_or("").to_string(),
            };
            group_pairs(url::form_urlencoded::parse(query.as_bytes()).into_owned())
        })
    }

    /// One query parameter: a string, or an array when the key repeats
    pub fn query_parameter(&self, name: &str) -> Option<&Value> {
        self.query_value().get(name)
    }

    /// Query parameters deserialised into `T`
    pub fn query_parameters<T: DeserializeOwned>(&self) -> Result<T> {
        validate(self.query_value().clone(), "query")
    }

    /// Headers deserialised into `T`; repeated headers are joined with `, `
    pub fn headers_as<T: DeserializeOwned>(&self) -> Result<T> {
        let mut object = Map::new();
        for name in self.inner.headers.keys() {
            let joined = self
                .inner
                .headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(", ");
            object.insert(name.as_str().to_string(), Value::String(joined));
        }
        validate(Value::Object(object), "headers")
    }

    fn cookie_map(&self) -> &HashMap<String, String> {
        self.inner.cookies.get_or_init(|| {
            let mut cookies = HashMap::new();
            for header in self.inner.headers.get_all(http::header::COOKIE) {
                let Ok(header) = header.to_str() else { continue };
                for part in header.split(';') {
                    let Some((key, value)) = part.split_once('=') else { continue };
                    cookies.insert(decode_lossy(key.trim()), decode_lossy(value.trim()));
                }
            }
            cookies
        })
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookie_map().get(name).map(String::as_str)
    }

    /// Cookies deserialised into `T`
    pub fn cookies<T: DeserializeOwned>(&self) -> Result<T> {
        let value =
            Value::Object(self.cookie_map().iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect());
        validate(value, "cookies")
    }

    /// The parsed body, read and parsed at most once
    ///
    /// `null` when no parser is registered for the content type.
    pub async fn body_value(&self) -> Result<Value> {
        let parsed = self.inner.parsed_body.get_or_init(|| self.parse_body()).await;
        parsed.clone().map_err(Error::Validation)
    }

    /// Parsed body deserialised into `T`
    pub async fn body<T: DeserializeOwned>(&self) -> Result<T> {
        validate(self.body_value().await?, "body")
    }

    async fn parse_body(&self) -> std::result::Result<Value, RequestValidationError> {
        let key = match self.header("content-type") {
            Some(content_type) => media_type(content_type),
            None if self.inner.headers.contains_key(http::header::CONTENT_TYPE) => String::new(),
            None => DEFAULT_PARSER_KEY.to_string(),
        };

        let Some(parser) = self.inner.context.parsers.get(&key).cloned() else {
            return Ok(Value::Null);
        };
        let Some(body) = self.inner.body.lock().await.take() else {
            return Ok(Value::Null);
        };

        parser.parse(BodyReader::new(body, self.inner.context.max_body_size)).await.map_err(|error| {
            log::debug!("Failed to parse {} request body: {}", key, error);
            RequestValidationError::new(vec![ValidationIssue::new("Failed to parse request body", &["body"])])
                .with_source(error)
        })
    }

    /// Discard whatever part of the body nobody read
    pub async fn drain(&self) {
        let Some(mut body) = self.inner.body.lock().await.take() else {
            return;
        };
        while let Some(frame) = body.frame().await {
            if frame.is_err() {
                break;
            }
        }
    }
}

fn decode_lossy(value: &str) -> String {
    match urlencoding::decode(value) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => value.to_string(),
    }
}

fn validate<T: DeserializeOwned>(value: Value, prefix: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|error| {
        let issue = ValidationIssue::new(error.to_string(), &[prefix]);
        Error::Validation(RequestValidationError::new(vec![issue]).with_source(error))
    })
}
