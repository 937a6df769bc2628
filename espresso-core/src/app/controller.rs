//! Controllers: prefixed groups of routes with their own filters and error
//! handlers
//!
//! A controller's filters and error handlers only run for requests that
//! matched one of its routes. Errors its error handlers don't stop are passed
//! on to the enclosing controller (or the application) as a [`Failure`]
//! remembering whether any handler saw them.

use std::future::Future;
use std::sync::Arc;

use futures::future::FutureExt;

use super::error_handler::{apply_error_handlers, error_handler_fn, ErrorContext, ErrorHandler};
use super::filter::{apply_filters, filter_fn, Filter};
use crate::error::{Failure, Result};
use crate::http::route::{IntoStrings, Route, RouteHandler};
use crate::http::{Request, Response};

/// A prefixed bundle of routes, filters and error handlers
#[derive(Clone, Default)]
pub struct Controller {
    prefix: String,
    routes: Vec<Route>,
    filters: Vec<Filter>,
    error_handlers: Vec<ErrorHandler>,
}

impl Controller {
    /// Create a controller mounted at `prefix` (`""` for none)
    pub fn new(prefix: &str) -> Self {
        Self { prefix: normalize_prefix(prefix), ..Self::default() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Create and add a route below the prefix
    pub fn add_route<F, Fut>(&mut self, methods: impl IntoStrings, paths: impl IntoStrings, handler: F) -> &mut Self
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.add(Route::new(methods, paths, handler))
    }

    /// Add a predefined route below the prefix
    pub fn add(&mut self, route: Route) -> &mut Self {
        let paths = route.paths.iter().map(|path| self.prefixed(path)).collect::<Vec<_>>();
        self.routes.push(Route::from_wrapped(route.methods, paths, route.handler));
        self
    }

    /// Add every route of `controller`, nested below this prefix
    pub fn add_controller(&mut self, controller: &Controller) -> &mut Self {
        for route in controller.routes() {
            self.add(route);
        }
        self
    }

    pub fn add_filter<F, Fut>(&mut self, filter: F) -> &mut Self
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.filters.push(filter_fn(filter));
        self
    }

    pub fn add_error_handler<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(ErrorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.error_handlers.push(error_handler_fn(handler));
        self
    }

    /// The routes, each wrapped in this controller's filters and error handlers
    ///
    /// The wrapping captures the filters and error handlers registered so far.
    pub fn routes(&self) -> Vec<Route> {
        let filters: Arc<[Filter]> = self.filters.clone().into();
        let error_handlers: Arc<[ErrorHandler]> = self.error_handlers.clone().into();

        self.routes
            .iter()
            .map(|route| {
                let handler = scoped(route.handler.clone(), filters.clone(), error_handlers.clone());
                Route::from_wrapped(route.methods.clone(), route.paths.clone(), handler)
            })
            .collect()
    }

    fn prefixed(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.prefix, path)
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }
}

fn scoped(inner: RouteHandler, filters: Arc<[Filter]>, error_handlers: Arc<[ErrorHandler]>) -> RouteHandler {
    Arc::new(move |request: Request, response: Response| {
        let inner = inner.clone();
        let filters = filters.clone();
        let error_handlers = error_handlers.clone();

        async move {
            let result = async {
                apply_filters(&filters, &request, &response).await?;
                if response.sent() {
                    return Ok(());
                }
                inner(request.clone(), response.clone()).await
            }
            .await;

            let Err(failure) = result else {
                return Ok(());
            };

            let outcome = apply_error_handlers(&error_handlers, failure, &request, &response).await;
            if outcome.stopped {
                return Ok(());
            }
            Err(Failure { error: outcome.error, handled: outcome.handled })
        }
        .boxed()
    })
}

/// `/api/` -> `/api`, `api` -> `/api`, `/` -> ``
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
