//! Per-request pipeline
//!
//! 1. application filters
//! 2. route lookup and the matched handler
//! 3. default handlers, when nothing has responded yet
//! 4. a `404` when still nothing has responded
//!
//! A failure anywhere goes through the application error handlers and ends
//! in a `400` or `500` unless a response is already out. Whatever happens,
//! the unread request body is drained and the response is completed.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::FutureExt;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use http::{HeaderMap, StatusCode};
use http_body_util::BodyExt;

use super::error_handler::{apply_error_handlers, ErrorHandler};
use super::filter::{apply_filters, Filter};
use crate::error::{BoxError, Failure};
use crate::http::body::{body_from, ResponseBody};
use crate::http::compression::CompressionProvider;
use crate::http::parser::ParserMap;
use crate::http::request::RequestContext;
use crate::http::{invalid_request_body, Request, Response, Route, RouteMatch, Router};
use crate::http::{INTERNAL_ERROR_BODY, NOT_FOUND_BODY};

pub(crate) struct ListenerParts {
    pub router: Router<Route>,
    pub parsers: ParserMap,
    pub filters: Vec<Filter>,
    pub error_handlers: Vec<ErrorHandler>,
    pub default_handlers: Vec<Filter>,
    pub default_headers: HeaderMap,
    pub compression: Option<Arc<CompressionProvider>>,
    pub max_body_size: usize,
    pub access_log: bool,
}

/// An immutable snapshot of an application's registrations
///
/// Cheap to clone; every clone serves requests with the same tables.
#[derive(Clone)]
pub struct Listener {
    inner: Arc<ListenerInner>,
}

struct ListenerInner {
    router: Router<Route>,
    parsers: Arc<ParserMap>,
    filters: Vec<Filter>,
    error_handlers: Vec<ErrorHandler>,
    default_handlers: Vec<Filter>,
    default_headers: HeaderMap,
    compression: Option<Arc<CompressionProvider>>,
    max_body_size: usize,
    access_log: bool,
}

impl Listener {
    pub(crate) fn new(parts: ListenerParts) -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                router: parts.router,
                parsers: Arc::new(parts.parsers),
                filters: parts.filters,
                error_handlers: parts.error_handlers,
                default_handlers: parts.default_handlers,
                default_headers: parts.default_headers,
                compression: parts.compression,
                max_body_size: parts.max_body_size,
                access_log: parts.access_log,
            }),
        }
    }

    /// Run one request through the pipeline without a socket
    pub async fn handle<B>(&self, request: http::Request<B>) -> http::Response<ResponseBody>
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        self.serve(request, None, None).await
    }

    pub(crate) async fn serve<B>(
        &self,
        request: http::Request<B>,
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
    ) -> http::Response<ResponseBody>
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let started = Instant::now();
        let (parts, body) = request.into_parts();
        let context = RequestContext {
            local_addr,
            remote_addr,
            parsers: self.inner.parsers.clone(),
            max_body_size: self.inner.max_body_size,
        };
        let request = Request::new(parts, body.map_err(Into::into).boxed_unsync(), context);
        let (response, outlet) =
            Response::new(&request, self.inner.compression.clone(), &self.inner.default_headers);

        let listener = self.clone();
        let (task_request, task_response) = (request.clone(), response.clone());
        tokio::spawn(async move {
            let run = AssertUnwindSafe(listener.run(&task_request, &task_response)).catch_unwind().await;
            if run.is_err() {
                log::error!("Handler panicked on {} {}", task_request.method(), task_request.path());
                if !task_response.sent() {
                    let sent = task_response.send_json(&INTERNAL_ERROR_BODY, StatusCode::INTERNAL_SERVER_ERROR).await;
                    if let Err(error) = sent {
                        log::debug!("Could not send the panic response: {}", error);
                    }
                }
            }
            task_request.drain().await;
            task_response.finish();
        });

        let sent = match outlet.await {
            Ok(sent) => sent,
            Err(_) => {
                log::error!("Request pipeline ended without a response");
                let mut fallback = http::Response::new(body_from(Bytes::new()));
                *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            }
        };

        if self.inner.access_log {
            access_log(&request, &sent, started);
        }
        sent
    }

    async fn run(&self, request: &Request, response: &Response) {
        if let Err(failure) = self.dispatch(request, response).await {
            self.recover(failure, request, response).await;
        }
    }

    async fn dispatch(&self, request: &Request, response: &Response) -> Result<(), Failure> {
        apply_filters(&self.inner.filters, request, response).await?;
        if response.sent() {
            return Ok(());
        }

        match self.inner.router.find(request.method().as_str(), request.path()) {
            RouteMatch::Found { value, params } => {
                request.set_path_params(params);
                value.handle(request.clone(), response.clone()).await?;
                if response.sent() {
                    return Ok(());
                }
            }
            RouteMatch::PathFound => {
                log::debug!("No {} route for {}", request.method(), request.path());
            }
            RouteMatch::NotFound => {}
        }

        apply_filters(&self.inner.default_handlers, request, response).await?;
        if response.sent() {
            return Ok(());
        }

        response.send_json(&NOT_FOUND_BODY, StatusCode::NOT_FOUND).await?;
        Ok(())
    }

    async fn recover(&self, failure: Failure, request: &Request, response: &Response) {
        let outcome = apply_error_handlers(&self.inner.error_handlers, failure, request, response).await;

        if !outcome.handled {
            log::error!("Unhandled error on {} {}: {}", request.method(), request.path(), outcome.error);
        }
        if response.sent() {
            return;
        }

        let sent = match outcome.error.as_validation() {
            Some(validation) => {
                response.send_json(&invalid_request_body(validation.issues()), StatusCode::BAD_REQUEST).await
            }
            None => response.send_json(&INTERNAL_ERROR_BODY, StatusCode::INTERNAL_SERVER_ERROR).await,
        };
        if let Err(error) = sent {
            log::debug!("Could not send the error response: {}", error);
        }
    }
}

fn access_log(request: &Request, response: &http::Response<ResponseBody>, started: Instant) {
    let header = |name: http::header::HeaderName| response.headers().get(name).and_then(|v| v.to_str().ok());
    let line = serde_json::json!({
        "remote": request.remote_addr().map(|addr| addr.to_string()),
        "method": request.method().as_str(),
        "path": request.path(),
        "status": response.status().as_u16(),
        "length": header(CONTENT_LENGTH),
        "encoding": header(CONTENT_ENCODING),
        "duration_ms": started.elapsed().as_secs_f64() * 1000.0,
    });
    log::info!(target: "espresso::access", "{}", line);
}
