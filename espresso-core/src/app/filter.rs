//! Filter chains
//!
//! A filter runs before route dispatch and may answer the request itself.
//! Chains run strictly in registration order and stop at the first filter
//! that sends a response.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::error::Result;
use crate::http::{Request, Response};

/// Type-erased filter (also the shape of default handlers)
pub type Filter = Arc<dyn Fn(Request, Response) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Box an async closure into a [`Filter`]
pub fn filter_fn<F, Fut>(f: F) -> Filter
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |request: Request, response: Response| f(request, response).boxed())
}

/// Run `filters` in order until one of them sends a response
pub(crate) async fn apply_filters(filters: &[Filter], request: &Request, response: &Response) -> Result<()> {
    for filter in filters {
        if response.sent() {
            break;
        }
        filter(request.clone(), response.clone()).await?;
    }
    Ok(())
}
