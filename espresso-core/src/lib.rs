//! Espresso - Core
//!
//! A small HTTP serving core: trie routing with specificity rules, scoped
//! filters and error handlers, lazy body parsing, negotiated compression and
//! conditional file serving, on top of tokio and hyper.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use espresso_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut api = Controller::new("/api");
//!     api.add_route("GET", "/items/{id}", |req: Request, res: Response| async move {
//!         let id = req.path_parameter("id").unwrap_or_default().to_string();
//!         res.send_json(&serde_json::json!({ "id": id }), SendOptions::new()).await
//!     });
//!
//!     let mut app = Application::with_config(EspressoConfig::load()?);
//!     app.add_controller(&api)?
//!         .add(spa_route("./public", SpaOptions::new()))?;
//!
//!     app.listen(ListenOptions::new().close_on_signal(true)).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`http`] - path templates, the router, request and response facades,
//!   body parsers, compression and the send pipeline
//! - [`app`] - controllers, the [`Application`], the per-request
//!   [`Listener`] pipeline and socket serving
//! - [`factory`] - health, info and single page application routes
//! - [`config`] - `espresso.toml` and `ESPRESSO_*` configuration
//! - [`logging`] - the `log` backend

pub mod app;
pub mod config; // espresso.toml + ESPRESSO_* environment
pub mod error;
pub mod factory;
pub mod http;
pub mod logging; // log facade backend

// Prelude module for convenient imports
pub mod prelude;

// Re-exports of main types
pub use crate::app::{AppEvent, Application, Controller, ErrorContext, ListenOptions, Listener, ServerHandle};
pub use crate::config::EspressoConfig;
pub use crate::error::{Error, Failure, RequestValidationError, Result, ValidationIssue};
pub use crate::http::{Request, Response, Route, SendFileOptions, SendOptions};
