//! Socket serving and graceful shutdown
//!
//! Each `listen` call gets its own accept loop. Connections are HTTP/1.1,
//! served by hyper on their own tasks. Shutdown stops the accept loop, asks
//! every live connection to finish its in-flight request, and aborts whatever
//! is still open once the grace period is over.

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use super::listener::Listener;
use crate::error::Result;

/// Lifecycle notifications published by an [`Application`](super::Application)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// A server is bound and accepting connections
    Listening { url: String, addr: SocketAddr },
    /// `close` was called; servers are shutting down
    Closing,
    /// Every server has shut down
    Closed,
}

/// Where and how to listen
#[derive(Debug, Default)]
pub struct ListenOptions {
    /// Host to bind (configured host when `None`)
    pub host: Option<String>,
    /// Port to bind (configured port when `None`, `0` picks a free one)
    pub port: Option<u16>,
    /// Serve on an already bound socket instead of binding one
    pub listener: Option<TcpListener>,
    /// Shut this server down on Ctrl-C
    pub close_on_signal: bool,
}

impl ListenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn close_on_signal(mut self, enabled: bool) -> Self {
        self.close_on_signal = enabled;
        self
    }
}

/// A running server
#[derive(Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    url: String,
    shutdown: watch::Sender<bool>,
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle").field("url", &self.url).finish_non_exhaustive()
    }
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://<addr>:<port>`
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start a graceful shutdown of this server only
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

pub(crate) struct RunningServer {
    pub handle: ServerHandle,
    pub task: JoinHandle<()>,
}

/// Start the accept loop for `socket`
pub(crate) fn start(listener: Listener, socket: TcpListener, grace: Duration) -> Result<RunningServer> {
    let local_addr = socket.local_addr()?;
    let (shutdown, signal) = watch::channel(false);
    let handle = ServerHandle { local_addr, url: format!("http://{}", local_addr), shutdown };
    let task = tokio::spawn(accept_loop(listener, socket, signal, grace));
    Ok(RunningServer { handle, task })
}

async fn accept_loop(listener: Listener, socket: TcpListener, mut signal: watch::Receiver<bool>, grace: Duration) {
    let local_addr = socket.local_addr().ok();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = socket.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    connections.spawn(serve_connection(listener.clone(), stream, local_addr, remote_addr, signal.clone()));
                }
                Err(error) => {
                    log::warn!("Failed to accept connection: {}", error);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            _ = closing(&mut signal) => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(socket);
    log::debug!("Stopped accepting; {} connection(s) still open", connections.len());

    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        log::warn!("Aborting {} connection(s) still open after {:?}", connections.len(), grace);
        connections.abort_all();
        while connections.join_next().await.is_some() {}
    }
}

/// Resolves once shutdown was requested; never, if the handle is gone
async fn closing(signal: &mut watch::Receiver<bool>) {
    while !*signal.borrow_and_update() {
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn serve_connection(
    listener: Listener,
    stream: tokio::net::TcpStream,
    local_addr: Option<SocketAddr>,
    remote_addr: SocketAddr,
    mut signal: watch::Receiver<bool>,
) {
    let service = service_fn(move |request| {
        let listener = listener.clone();
        async move { Ok::<_, Infallible>(listener.serve(request, local_addr, Some(remote_addr)).await) }
    });

    let connection = http1::Builder::new().keep_alive(true).serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = closing(&mut signal) => {
            connection.as_mut().graceful_shutdown();
            connection.as_mut().await
        }
    };

    if let Err(error) = result {
        log::debug!("Connection from {} ended with an error: {}", remote_addr, error);
    }
}
