//! The application: registration tables plus the servers serving them
//!
//! # Example
//!
//! ```no_run
//! use espresso_core::prelude::*;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut app = Application::new();
//! app.add_route("GET", "/items/{id}", |req: Request, res: Response| async move {
//!     let id = req.path_parameter("id").unwrap_or_default().to_string();
//!     res.send_json(&serde_json::json!({ "id": id }), SendOptions::new()).await
//! })?;
//!
//! let server = app.listen(ListenOptions::new().port(3000).close_on_signal(true)).await?;
//! println!("listening on {}", server.url());
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod error_handler;
pub mod filter;
pub mod listener;
pub mod server;

pub use controller::Controller;
pub use error_handler::{error_handler_fn, ErrorContext, ErrorHandler};
pub use filter::{filter_fn, Filter};
pub use listener::Listener;
pub use server::{AppEvent, ListenOptions, ServerHandle};

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use http::HeaderMap;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use self::listener::ListenerParts;
use self::server::RunningServer;
use crate::config::EspressoConfig;
use crate::error::{Error, Result};
use crate::http::compression::{CompressionOptions, CompressionProvider};
use crate::http::parser::{default_parsers, Parser, ParserMap};
use crate::http::path::parse_path_template;
use crate::http::response::parse_header;
use crate::http::route::{IntoStrings, Route};
use crate::http::router::Router;
use crate::http::{Request, Response};

const EVENT_CAPACITY: usize = 16;

/// Routes, filters, error handlers and parsers, served by zero or more servers
pub struct Application {
    config: EspressoConfig,
    router: Router<Route>,
    parsers: ParserMap,
    filters: Vec<Filter>,
    error_handlers: Vec<ErrorHandler>,
    default_handlers: Vec<Filter>,
    default_headers: HeaderMap,
    compression: Option<Arc<CompressionProvider>>,
    events: broadcast::Sender<AppEvent>,
    servers: Mutex<Vec<RunningServer>>,
    closed: AtomicBool,
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    /// An application with the default configuration
    pub fn new() -> Self {
        Self::with_config(EspressoConfig::default())
    }

    /// An application using `config` for listening, body limits,
    /// compression and logging
    pub fn with_config(config: EspressoConfig) -> Self {
        let compression = config.compression.to_options().map(|options| Arc::new(CompressionProvider::new(options)));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            config,
            router: Router::new(),
            parsers: default_parsers(),
            filters: Vec::new(),
            error_handlers: Vec::new(),
            default_handlers: Vec::new(),
            default_headers: HeaderMap::new(),
            compression,
            events,
            servers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &EspressoConfig {
        &self.config
    }

    /// Create and add a route for every combination of `methods` and `paths`
    pub fn add_route<F, Fut>(&mut self, methods: impl IntoStrings, paths: impl IntoStrings, handler: F) -> Result<&mut Self>
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.add(Route::new(methods, paths, handler))
    }

    /// Add a predefined route
    ///
    /// Every path template is checked first; when one is rejected nothing is
    /// registered.
    pub fn add(&mut self, route: Route) -> Result<&mut Self> {
        for path in route.paths() {
            parse_path_template(path)?;
        }
        for method in route.methods() {
            for path in route.paths() {
                self.router.add(method, path, route.clone())?;
            }
        }
        Ok(self)
    }

    /// Add every route of `controller`, wrapped in its filters and error handlers
    pub fn add_controller(&mut self, controller: &Controller) -> Result<&mut Self> {
        let routes = controller.routes();
        for path in routes.iter().flat_map(|route| route.paths()) {
            parse_path_template(path)?;
        }
        for route in routes {
            self.add(route)?;
        }
        Ok(self)
    }

    /// Run `filter` on every request, before routing
    pub fn add_filter<F, Fut>(&mut self, filter: F) -> &mut Self
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.filters.push(filter_fn(filter));
        self
    }

    /// Offer every error that escapes routing to `handler`
    pub fn add_error_handler<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(ErrorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.error_handlers.push(error_handler_fn(handler));
        self
    }

    /// Run `handler` when nothing else responded, before the `404`
    pub fn add_default_handler<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.default_handlers.push(filter_fn(handler));
        self
    }

    /// Parse bodies of the given media types (or `default`) with `parser`
    pub fn add_parser<P>(&mut self, content_types: impl IntoStrings, parser: P) -> &mut Self
    where
        P: Parser + 'static,
    {
        let parser: Arc<dyn Parser> = Arc::new(parser);
        for content_type in content_types.into_strings() {
            self.parsers.insert(content_type.to_ascii_lowercase(), parser.clone());
        }
        self
    }

    /// Stop parsing bodies of the given media types
    pub fn disable_parser(&mut self, content_types: impl IntoStrings) -> &mut Self {
        for content_type in content_types.into_strings() {
            self.parsers.remove(&content_type.to_ascii_lowercase());
        }
        self
    }

    /// Add a header to every response
    pub fn set_default_header(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        let (name, value) = parse_header(name, value)?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Replace the compression settings
    pub fn compression(&mut self, options: CompressionOptions) -> &mut Self {
        self.compression = Some(Arc::new(CompressionProvider::new(options)));
        self
    }

    pub fn disable_compression(&mut self) -> &mut Self {
        self.compression = None;
        self
    }

    /// Lifecycle notifications from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.events.subscribe()
    }

    /// Snapshot the current registrations into a request pipeline
    ///
    /// Registrations made afterwards only show up in later snapshots.
    pub fn listener(&self) -> Listener {
        Listener::new(ListenerParts {
            router: self.router.clone(),
            parsers: self.parsers.clone(),
            filters: self.filters.clone(),
            error_handlers: self.error_handlers.clone(),
            default_handlers: self.default_handlers.clone(),
            default_headers: self.default_headers.clone(),
            compression: self.compression.clone(),
            max_body_size: self.config.server.max_body_size,
            access_log: self.config.server.access_log,
        })
    }

    /// Handles of the servers started by `listen` and not yet closed
    pub fn servers(&self) -> Vec<ServerHandle> {
        self.lock_servers().iter().map(|server| server.handle.clone()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Bind (or adopt) a socket and serve the current registrations on it
    pub async fn listen(&self, options: ListenOptions) -> Result<ServerHandle> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.init_logging();

        let socket = match options.listener {
            Some(socket) => socket,
            None => {
                let host = options.host.unwrap_or_else(|| self.config.server.host.clone());
                let port = options.port.unwrap_or(self.config.server.port);
                let addr = format!("{}:{}", host, port);
                TcpListener::bind(&addr).await.with_context(|| format!("Failed to bind to {}", addr))?
            }
        };

        let running = server::start(self.listener(), socket, self.config.server.shutdown_grace())?;
        let handle = running.handle.clone();
        {
            let mut servers = self.lock_servers();
            if self.is_closed() {
                handle.shutdown();
                return Err(Error::Closed);
            }
            servers.push(running);
        }

        if options.close_on_signal {
            let signal_handle = handle.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::info!("Interrupted, shutting down {}", signal_handle.url());
                    signal_handle.shutdown();
                }
            });
        }

        log::info!("Server listening on {}", handle.url());
        let _ = self.events.send(AppEvent::Listening { url: handle.url().to_string(), addr: handle.local_addr() });
        Ok(handle)
    }

    /// Shut every server down
    ///
    /// New connections are refused at once; open ones get the configured
    /// grace period to finish. Later calls return immediately.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.events.send(AppEvent::Closing);

        let servers = std::mem::take(&mut *self.lock_servers());
        log::info!("Closing {} server(s)", servers.len());
        for server in &servers {
            server.handle.shutdown();
        }
        for server in servers {
            if let Err(error) = server.task.await {
                log::warn!("Server {} stopped abnormally: {}", server.handle.url(), error);
            }
        }

        log::info!("All servers closed");
        let _ = self.events.send(AppEvent::Closed);
    }

    fn lock_servers(&self) -> MutexGuard<'_, Vec<RunningServer>> {
        self.servers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_logging(&self) {
        let Some(logging) = &self.config.logging else {
            let _ = env_logger::Builder::from_default_env().format_timestamp_millis().try_init();
            return;
        };

        let installed = logging
            .to_logging_config()
            .and_then(|config| crate::logging::init_logging(&config));
        if let Err(error) = installed {
            log::warn!("Keeping the existing logger: {}", error);
        }
    }
}
