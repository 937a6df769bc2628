//! Static info route (build details, versions, ...)

use std::sync::{Arc, OnceLock};

use chrono::{SubsecRound, Utc};
use http::StatusCode;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::http::conditional::{format_http_date, is_modified};
use crate::http::route::{IntoStrings, Route};
use crate::http::{Request, Response, SendOptions};

#[derive(Debug, Clone)]
pub struct InfoOptions {
    /// Default `/_info`
    pub paths: Vec<String>,
    pub headers: Vec<(String, String)>,
}

impl Default for InfoOptions {
    fn default() -> Self {
        Self { paths: vec!["/_info".to_string()], headers: Vec::new() }
    }
}

impl InfoOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, paths: impl IntoStrings) -> Self {
        self.paths = paths.into_strings();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Random for every process, so a restart invalidates client caches
fn process_etag() -> &'static str {
    static ETAG: OnceLock<String> = OnceLock::new();
    ETAG.get_or_init(|| format!("\"{}\"", uuid::Uuid::new_v4()))
}

/// A `GET` route answering with `info` as JSON
///
/// The document is serialised once. Clients revalidate on every request
/// (`Cache-Control: max-age=0`) and get a `304` while the process lives.
pub fn info_route<T: Serialize + ?Sized>(info: &T, options: InfoOptions) -> Result<Route> {
    let body: Arc<serde_json::Value> = Arc::new(serde_json::to_value(info).map_err(Error::other)?);
    let last_modified = Utc::now().trunc_subsecs(0);
    let headers = options.headers;

    Ok(Route::new("GET", options.paths, move |request: Request, response: Response| {
        let body = body.clone();
        let headers = headers.clone();
        async move {
            let etag = process_etag();
            response
                .set_header("cache-control", "max-age=0")?
                .set_header("etag", etag)?
                .set_header("last-modified", &format_http_date(&last_modified))?;

            if !is_modified(request.headers(), Some(etag), Some(last_modified)) {
                return response.send((), SendOptions { status: Some(StatusCode::NOT_MODIFIED), headers }).await;
            }
            response.send_json(body.as_ref(), SendOptions { status: None, headers }).await
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};

    async fn call(route: &Route, request: http::Request<Full<Bytes>>) -> http::Response<Bytes> {
        let request = Request::from_http(request);
        let (response, outlet) = Response::for_request(&request);
        route.handle(request, response.clone()).await.unwrap();

        let (parts, body) = outlet.await.unwrap().into_parts();
        http::Response::from_parts(parts, body.collect().await.unwrap().to_bytes())
    }

    fn get() -> http::request::Builder {
        http::Request::get("/_info")
    }

    #[tokio::test]
    async fn test_serves_info_with_validators() {
        let route = info_route(&serde_json::json!({ "version": "1.2.3" }), InfoOptions::new()).unwrap();
        assert_eq!(route.paths(), ["/_info"]);

        let response = call(&route, get().body(Full::new(Bytes::new())).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["cache-control"], "max-age=0");
        assert_eq!(response.headers()["etag"], process_etag());
        assert_eq!(response.body().as_ref(), br#"{"version":"1.2.3"}"#);
    }

    #[tokio::test]
    async fn test_matching_etag_is_not_modified() {
        let route = info_route(&serde_json::json!({ "version": "1.2.3" }), InfoOptions::new()).unwrap();

        let request = get().header("if-none-match", process_etag()).body(Full::new(Bytes::new())).unwrap();
        let response = call(&route, request).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(response.body().is_empty());

        let request = get().header("if-none-match", "\"stale\"").body(Full::new(Bytes::new())).unwrap();
        assert_eq!(call(&route, request).await.status(), StatusCode::OK);
    }
}
