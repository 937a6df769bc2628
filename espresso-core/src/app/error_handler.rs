//! Error-handler chains
//!
//! Every handler in a chain sees the error, in registration order, even after
//! an earlier one handled it. A handler can end the chain early with
//! [`ErrorContext::skip_remaining_handlers`]; a handler that fails replaces
//! the error for the handlers after it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::error::{Error, Failure, Result};
use crate::http::{Request, Response};

/// What an error handler gets to work with
#[derive(Clone)]
pub struct ErrorContext {
    pub error: Arc<Error>,
    pub request: Request,
    pub response: Response,
    stop: Arc<AtomicBool>,
}

impl ErrorContext {
    /// Don't run the handlers after this one
    ///
    /// Inside a controller this also keeps the error from reaching the
    /// enclosing scopes.
    pub fn skip_remaining_handlers(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Type-erased error handler
pub type ErrorHandler = Arc<dyn Fn(ErrorContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Box an async closure into an [`ErrorHandler`]
pub fn error_handler_fn<F, Fut>(f: F) -> ErrorHandler
where
    F: Fn(ErrorContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |context: ErrorContext| f(context).boxed())
}

/// State of an error after a chain ran
#[derive(Debug)]
pub(crate) struct ErrorOutcome {
    pub error: Arc<Error>,
    pub handled: bool,
    pub stopped: bool,
}

pub(crate) async fn apply_error_handlers(
    handlers: &[ErrorHandler],
    failure: Failure,
    request: &Request,
    response: &Response,
) -> ErrorOutcome {
    let Failure { mut error, mut handled } = failure;
    let stop = Arc::new(AtomicBool::new(false));

    for handler in handlers {
        let context = ErrorContext {
            error: error.clone(),
            request: request.clone(),
            response: response.clone(),
            stop: stop.clone(),
        };

        match handler(context).await {
            Ok(()) => {
                handled = true;
                if stop.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(replacement) => {
                error = Arc::new(replacement);
                handled = false;
            }
        }
    }

    ErrorOutcome { error, handled, stopped: stop.load(Ordering::SeqCst) }
}
