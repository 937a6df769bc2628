//! Routes: methods and path templates bound to one handler

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use super::request::Request;
use super::response::Response;
use crate::error::{Failure, Result};

/// Type-erased route handler
///
/// Wrapped handlers report errors as a [`Failure`] so enclosing controllers
/// know whether a narrower scope already dealt with them.
pub type RouteHandler =
    Arc<dyn Fn(Request, Response) -> BoxFuture<'static, std::result::Result<(), Failure>> + Send + Sync>;

/// A handler plus the endpoints it answers
#[derive(Clone)]
pub struct Route {
    pub(crate) methods: Vec<String>,
    pub(crate) paths: Vec<String>,
    pub(crate) handler: RouteHandler,
}

impl Route {
    /// Create a route from a plain async handler
    ///
    /// ```rust,ignore
    /// let route = Route::new("GET", "/items/{id}", |req: Request, res: Response| async move {
    ///     let id = req.path_parameter("id").unwrap_or_default().to_string();
    ///     res.send_json(&serde_json::json!({ "id": id }), SendOptions::new()).await
    /// });
    /// ```
    pub fn new<F, Fut>(methods: impl IntoStrings, paths: impl IntoStrings, handler: F) -> Self
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Self::from_wrapped(
            methods,
            paths,
            Arc::new(move |request: Request, response: Response| {
                let handler = handler.clone();
                async move { handler(request, response).await.map_err(Failure::new) }.boxed()
            }),
        )
    }

    /// Create a route from an already wrapped handler
    pub fn from_wrapped(methods: impl IntoStrings, paths: impl IntoStrings, handler: RouteHandler) -> Self {
        Self { methods: methods.into_strings(), paths: paths.into_strings(), handler }
    }

    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn handler(&self) -> &RouteHandler {
        &self.handler
    }

    /// Run the handler
    pub async fn handle(&self, request: Request, response: Response) -> std::result::Result<(), Failure> {
        (self.handler)(request, response).await
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route").field("methods", &self.methods).field("paths", &self.paths).finish_non_exhaustive()
    }
}

/// One or many strings: `"GET"`, `["GET", "HEAD"]`, `vec![..]`
pub trait IntoStrings {
    fn into_strings(self) -> Vec<String>;
}

impl IntoStrings for &str {
    fn into_strings(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoStrings for String {
    fn into_strings(self) -> Vec<String> {
        vec![self]
    }
}

impl<const N: usize> IntoStrings for [&str; N] {
    fn into_strings(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl IntoStrings for &[&str] {
    fn into_strings(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl IntoStrings for Vec<String> {
    fn into_strings(self) -> Vec<String> {
        self
    }
}

impl IntoStrings for Vec<&str> {
    fn into_strings(self) -> Vec<String> {
        self.into_iter().map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use bytes::Bytes;
    use http_body_util::Full;

    fn pair() -> (Request, Response) {
        let request = Request::from_http(http::Request::get("/").body(Full::new(Bytes::new())).unwrap());
        let (response, _rx) = Response::for_request(&request);
        (request, response)
    }

    #[test]
    fn test_into_strings() {
        assert_eq!("GET".into_strings(), vec!["GET"]);
        assert_eq!(["GET", "HEAD"].into_strings(), vec!["GET", "HEAD"]);
        assert_eq!(vec!["/a".to_string()].into_strings(), vec!["/a"]);
    }

    #[tokio::test]
    async fn test_handler_errors_become_unhandled_failures() {
        let route = Route::new("GET", "/", |_req: Request, _res: Response| async { Err(Error::msg("boom")) });
        let (request, response) = pair();

        let failure = route.handle(request, response).await.unwrap_err();
        assert!(!failure.handled);
        assert_eq!(failure.error.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_route_keeps_endpoints() {
        let route = Route::new(["GET", "HEAD"], ["/a", "/b"], |_req: Request, _res: Response| async { Ok(()) });
        assert_eq!(route.methods(), ["GET", "HEAD"]);
        assert_eq!(route.paths(), ["/a", "/b"]);

        let (request, response) = pair();
        assert!(route.handle(request, response).await.is_ok());
    }
}
