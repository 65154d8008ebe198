//! Idempotent start/stop for the sidecar's small HTTP control servers.

use axum::Router;
use parking_lot::Mutex;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::error::Error;

/// An axum server that can be started and stopped repeatedly.
///
/// The running flag and the server handle live under one mutex, so
/// concurrent `start`/`stop` calls are serialized.
#[derive(Debug)]
pub struct HttpServer {
    name: &'static str,
    addr: SocketAddr,
    state: Mutex<Option<Running>>,
}

#[derive(Debug)]
struct Running {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
}

impl HttpServer {
    /// Create a stopped server that will bind `addr`.
    pub fn new(name: &'static str, addr: SocketAddr) -> Self {
        Self {
            name,
            addr,
            state: Mutex::new(None),
        }
    }

    /// Bind and start serving `app`. A no-op if already running.
    ///
    /// A watcher task calls [`HttpServer::stop`] once `shutdown` resolves.
    pub fn start<F>(self: &Arc<Self>, app: Router, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.is_some() {
            return Ok(());
        }

        let listener = bind(self.addr)?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let name = self.name;
        tokio::spawn(async move {
            let graceful = async move {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!(server = name, error = %e, "HTTP server failed");
            }
        });

        *state = Some(Running {
            local_addr,
            shutdown: shutdown_tx,
        });
        drop(state);
        info!(server = name, addr = %local_addr, "HTTP server listening");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            shutdown.await;
            this.stop();
        });

        Ok(())
    }

    /// Stop serving and release the listener. A no-op if not running.
    pub fn stop(&self) {
        if let Some(running) = self.state.lock().take() {
            let _ = running.shutdown.send(());
            info!(server = self.name, "HTTP server stopped");
        }
    }

    /// Whether the server is running.
    pub fn is_running(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().as_ref().map(|running| running.local_addr)
    }
}

/// Bind synchronously so the caller can hold the state lock.
fn bind(addr: SocketAddr) -> Result<tokio::net::TcpListener, Error> {
    let listener = std::net::TcpListener::bind(addr).map_err(|e| Error::bind(addr, e))?;
    listener.set_nonblocking(true)?;
    Ok(tokio::net::TcpListener::from_std(listener)?)
}
