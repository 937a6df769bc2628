//! Response facade
//!
//! A [`Response`] is a cloneable handle shared by every filter, handler and
//! error handler of one request. Status and headers are mutable until one of
//! the `send*` methods runs; from then on [`Response::sent`] is true and any
//! further mutation fails with [`Error::AlreadySent`].
//!
//! The finished `hyper::Response` leaves through a one-shot outlet, so the
//! connection can start writing it while the handler is still running.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt};
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use tokio::sync::oneshot;

use super::body::{Body, ResponseBody};
use super::compression::CompressionProvider;
use super::request::Request;
use super::{send, send_file};
use crate::error::{Error, Result};

/// Receiving end of a response's outlet
pub type ResponseReceiver = oneshot::Receiver<http::Response<ResponseBody>>;

/// Status and extra headers for a `send*` call
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub status: Option<StatusCode>,
    pub headers: Vec<(String, String)>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl From<StatusCode> for SendOptions {
    fn from(status: StatusCode) -> Self {
        SendOptions::new().status(status)
    }
}

/// Computes extra headers from the requested file name
pub type HeadersFn = Arc<dyn Fn(&str) -> Vec<(String, String)> + Send + Sync>;

/// Extra headers for [`Response::send_file`]
#[derive(Clone, Default)]
pub enum FileHeaders {
    #[default]
    None,
    Static(Vec<(String, String)>),
    ByFilename(HeadersFn),
}

impl FileHeaders {
    pub fn by_filename<F>(f: F) -> Self
    where
        F: Fn(&str) -> Vec<(String, String)> + Send + Sync + 'static,
    {
        FileHeaders::ByFilename(Arc::new(f))
    }

    pub(crate) fn resolve(&self, filename: &str) -> Vec<(String, String)> {
        match self {
            FileHeaders::None => Vec::new(),
            FileHeaders::Static(headers) => headers.clone(),
            FileHeaders::ByFilename(f) => f(filename),
        }
    }
}

impl fmt::Debug for FileHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileHeaders::None => f.write_str("None"),
            FileHeaders::Static(headers) => f.debug_tuple("Static").field(headers).finish(),
            FileHeaders::ByFilename(_) => f.write_str("ByFilename(..)"),
        }
    }
}

/// Called with `(response, root, filename)` when a file is missing
pub type NotFoundHandler =
    Arc<dyn Fn(Response, std::path::PathBuf, String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// What [`Response::send_file`] does when the file doesn't exist
#[derive(Clone)]
pub enum NotFound {
    /// Serve this file (relative to the same root) instead
    Document(String),
    /// Let a handler respond; a `404` follows if it doesn't
    Handler(NotFoundHandler),
}

impl fmt::Debug for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFound::Document(document) => f.debug_tuple("Document").field(document).finish(),
            NotFound::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

/// Options for [`Response::send_file`]
#[derive(Debug, Clone)]
pub struct SendFileOptions {
    pub status: Option<StatusCode>,
    pub headers: FileHeaders,
    pub on_not_found: Option<NotFound>,
    /// Answer satisfied conditional requests with `304` (default `true`)
    pub use_cache_control: bool,
}

impl Default for SendFileOptions {
    fn default() -> Self {
        Self { status: None, headers: FileHeaders::None, on_not_found: None, use_cache_control: true }
    }
}

impl SendFileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn headers(mut self, headers: FileHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn not_found_document(mut self, document: impl Into<String>) -> Self {
        self.on_not_found = Some(NotFound::Document(document.into()));
        self
    }

    pub fn not_found_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Response, std::path::PathBuf, String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.on_not_found = Some(NotFound::Handler(Arc::new(
            move |response: Response, root: std::path::PathBuf, filename: String| {
                handler(response, root, filename).boxed()
            },
        )));
        self
    }

    pub fn use_cache_control(mut self, enabled: bool) -> Self {
        self.use_cache_control = enabled;
        self
    }

    pub(crate) fn send_options(&self, filename: &str) -> SendOptions {
        SendOptions { status: self.status, headers: self.headers.resolve(filename) }
    }
}

pub(crate) struct ResponseState {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub sent: bool,
}

struct ResponseInner {
    request: Request,
    compression: Option<Arc<CompressionProvider>>,
    state: Mutex<ResponseState>,
    outlet: Mutex<Option<oneshot::Sender<http::Response<ResponseBody>>>>,
}

/// The outgoing half of one request
#[derive(Clone)]
pub struct Response {
    inner: Arc<ResponseInner>,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Response")
            .field("status", &state.status)
            .field("headers", &state.headers)
            .field("sent", &state.sent)
            .finish()
    }
}

impl Response {
    pub(crate) fn new(
        request: &Request,
        compression: Option<Arc<CompressionProvider>>,
        default_headers: &HeaderMap,
    ) -> (Self, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        let response = Self {
            inner: Arc::new(ResponseInner {
                request: request.clone(),
                compression,
                state: Mutex::new(ResponseState {
                    status: StatusCode::OK,
                    headers: default_headers.clone(),
                    sent: false,
                }),
                outlet: Mutex::new(Some(tx)),
            }),
        };
        (response, rx)
    }

    /// A response for `request` without compression or default headers
    ///
    /// The receiver yields the finished `http::Response` once it is sent.
    pub fn for_request(request: &Request) -> (Self, ResponseReceiver) {
        Self::new(request, None, &HeaderMap::new())
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ResponseState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn request(&self) -> &Request {
        &self.inner.request
    }

    pub(crate) fn compression(&self) -> Option<&CompressionProvider> {
        self.inner.compression.as_deref()
    }

    /// Whether a `send*` method has run
    pub fn sent(&self) -> bool {
        self.state().sent
    }

    pub fn status(&self) -> StatusCode {
        self.state().status
    }

    pub fn set_status(&self, status: StatusCode) -> Result<&Self> {
        self.mutate(|state| {
            state.status = status;
            Ok(())
        })
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.state().headers.contains_key(name)
    }

    /// First value of a header, if it is valid text
    pub fn header(&self, name: &str) -> Option<String> {
        self.state().headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
    }

    /// Snapshot of all headers
    pub fn headers(&self) -> HeaderMap {
        self.state().headers.clone()
    }

    pub fn header_names(&self) -> Vec<String> {
        self.state().headers.keys().map(|name| name.as_str().to_string()).collect()
    }

    /// Replace a header
    pub fn set_header(&self, name: &str, value: &str) -> Result<&Self> {
        let (name, value) = parse_header(name, value)?;
        self.mutate(|state| {
            state.headers.insert(name, value);
            Ok(())
        })
    }

    /// Replace several headers; repeated names in `headers` all survive
    pub fn set_headers<'a, I>(&self, headers: I) -> Result<&Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let parsed = headers.into_iter().map(|(n, v)| parse_header(n, v)).collect::<Result<Vec<_>>>()?;
        self.mutate(|state| {
            merge_headers(&mut state.headers, parsed);
            Ok(())
        })
    }

    /// Add a value without dropping the existing ones
    pub fn append_header(&self, name: &str, value: &str) -> Result<&Self> {
        let (name, value) = parse_header(name, value)?;
        self.mutate(|state| {
            state.headers.append(name, value);
            Ok(())
        })
    }

    pub fn remove_header(&self, name: &str) -> Result<&Self> {
        self.mutate(|state| {
            state.headers.remove(name);
            Ok(())
        })
    }

    fn mutate(&self, f: impl FnOnce(&mut ResponseState) -> Result<()>) -> Result<&Self> {
        let mut state = self.state();
        if state.sent {
            return Err(Error::AlreadySent);
        }
        f(&mut state)?;
        Ok(self)
    }

    /// Claim the response for sending; fails if someone already did
    pub(crate) fn begin_send(&self) -> Result<()> {
        let mut state = self.state();
        if state.sent {
            return Err(Error::AlreadySent);
        }
        state.sent = true;
        Ok(())
    }

    /// Send the response with an optional body
    pub async fn send(&self, body: impl Into<Body>, options: impl Into<SendOptions>) -> Result<()> {
        send::send(self, body.into(), options.into(), None).await
    }

    /// Serialise `value` as JSON and send it
    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T, options: impl Into<SendOptions>) -> Result<()> {
        let json = serde_json::to_vec(value).map_err(Error::other)?;
        send::send(self, Body::Bytes(json.into()), options.into(), Some("application/json")).await
    }

    /// Stream a file below `root`
    ///
    /// Paths escaping `root` get a `403`, missing files go to
    /// [`SendFileOptions::on_not_found`] and then a `404`.
    pub async fn send_file(&self, root: impl AsRef<Path>, filename: &str, options: SendFileOptions) -> Result<()> {
        send_file::send_file(self, root.as_ref(), filename, options).await
    }

    /// Hand the finished response to the connection
    pub(crate) fn dispatch(&self, body: ResponseBody) {
        let response = {
            let state = self.state();
            let mut response = http::Response::new(body);
            *response.status_mut() = state.status;
            *response.headers_mut() = state.headers.clone();
            response
        };

        let outlet = self.inner.outlet.lock().unwrap_or_else(PoisonError::into_inner).take();
        match outlet {
            Some(tx) => {
                if tx.send(response).is_err() {
                    log::debug!("Client went away before the response was dispatched");
                }
            }
            None => log::warn!("Response dispatched twice; dropping the second one"),
        }
    }

    /// Whether the response already left through the outlet
    pub(crate) fn is_dispatched(&self) -> bool {
        self.inner.outlet.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Send whatever head is set with an empty body, if nothing was sent yet
    pub(crate) fn finish(&self) {
        if self.is_dispatched() {
            return;
        }
        self.state().sent = true;
        self.dispatch(super::body::empty_body());
    }

    /// `Content-Type` default: only applied when none is set
    pub(crate) fn default_content_type(state: &mut ResponseState, content_type: &'static str) {
        if !state.headers.contains_key(CONTENT_TYPE) {
            state.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
    }
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    Ok((HeaderName::from_bytes(name.as_bytes())?, HeaderValue::from_str(value)?))
}

pub(crate) fn parse_headers(headers: &[(String, String)]) -> Result<Vec<(HeaderName, HeaderValue)>> {
    headers.iter().map(|(name, value)| parse_header(name, value)).collect()
}

/// Replace each named header with the given values
pub(crate) fn merge_headers(target: &mut HeaderMap, headers: Vec<(HeaderName, HeaderValue)>) {
    let mut replaced: Vec<HeaderName> = Vec::new();
    for (name, value) in headers {
        if !replaced.contains(&name) {
            target.remove(&name);
            replaced.push(name.clone());
        }
        target.append(name, value);
    }
}
