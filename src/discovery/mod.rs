//! Discovery-stream proxy.
//!
//! Accepts the engine's aggregated discovery stream on a TCP or Unix-domain
//! listener and relays it to the control plane over the shared upstream
//! connection, adding the control-plane token to every call.
//!
//! ```text
//! engine ──ADS──▶ DiscoveryService ──▶ Forwarder ──▶ Director ──▶ upstream
//!                                          │
//!                                          └── liveness gauge (every frame)
//! ```

pub mod codec;
pub mod director;
pub mod liveness;
pub mod service;

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tonic::transport::Server;
use tracing::{error, info};

pub use director::{DiscoveryMethod, Director, Route, SERVICE_NAME};
pub use service::{DiscoveryService, Forwarder, FrameStream, StreamHandler};

use crate::config::DiscoveryConfig;
use crate::error::Error;
use crate::metrics::SharedSink;
use crate::upstream::Upstream;

/// How a server's serve loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerExit {
    /// Still serving.
    Running,
    /// Stopped gracefully after a shutdown request.
    Stopped,
    /// The serve loop failed.
    Failed(String),
}

/// Observes the exit of a running server.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    exit: watch::Receiver<ServerExit>,
}

impl ServerHandle {
    /// Current state without waiting.
    pub fn status(&self) -> ServerExit {
        self.exit.borrow().clone()
    }

    /// Wait until the server has exited and report why.
    pub async fn exited(&mut self) -> ServerExit {
        match self.exit.wait_for(|exit| *exit != ServerExit::Running).await {
            Ok(exit) => exit.clone(),
            Err(_) => ServerExit::Failed("server task ended without reporting".to_string()),
        }
    }
}

enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener, PathBuf),
}

/// A bound discovery proxy, ready to serve.
pub struct DiscoveryProxy<H = Forwarder> {
    listener: Listener,
    handler: H,
}

impl DiscoveryProxy<Forwarder> {
    /// Bind the configured listener and prepare to forward to `upstream`.
    ///
    /// Fails if the listener cannot be bound.
    pub async fn setup(
        config: &DiscoveryConfig,
        upstream: &Upstream,
        sink: SharedSink,
    ) -> Result<Self, Error> {
        let director = Director::new(upstream.channel().clone(), upstream.token().clone());
        Self::bind(config, Forwarder::new(director, sink)).await
    }
}

impl<H: StreamHandler> DiscoveryProxy<H> {
    /// Bind the configured listener for an arbitrary stream handler.
    pub async fn bind(config: &DiscoveryConfig, handler: H) -> Result<Self, Error> {
        let listener = match config.unix_path() {
            Some(path) => {
                let listener =
                    UnixListener::bind(path).map_err(|e| Error::bind(&config.bind_addr, e))?;
                info!(path, "discovery proxy listening on unix socket");
                Listener::Unix(listener, PathBuf::from(path))
            }
            None => {
                let listener = match config.bind_addr.parse::<IpAddr>() {
                    Ok(ip) => {
                        let addr = SocketAddr::new(ip, config.port);
                        TcpListener::bind(addr).await.map_err(|e| Error::bind(addr, e))?
                    }
                    Err(_) => {
                        let addr = format!("{}:{}", config.bind_addr, config.port);
                        TcpListener::bind(&addr).await.map_err(|e| Error::bind(&addr, e))?
                    }
                };
                info!(addr = %listener.local_addr()?, "discovery proxy listening");
                Listener::Tcp(listener)
            }
        };

        Ok(Self { listener, handler })
    }

    /// Local TCP address, if listening on TCP.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            Listener::Unix(..) => None,
        }
    }

    /// Serve until `shutdown` resolves, then stop gracefully.
    ///
    /// In-flight streams are allowed to finish; new ones are refused. A Unix
    /// socket file is removed once serving ends.
    pub fn serve<F>(self, shutdown: F) -> ServerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self { listener, handler } = self;
        let (exit_tx, exit_rx) = watch::channel(ServerExit::Running);
        let router = Server::builder().add_service(DiscoveryService::new(handler));

        tokio::spawn(async move {
            let result = match listener {
                Listener::Tcp(listener) => {
                    router
                        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
                        .await
                }
                Listener::Unix(listener, path) => {
                    let result = router
                        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
                        .await;
                    let _ = std::fs::remove_file(&path);
                    result
                }
            };

            let exit = match result {
                Ok(()) => {
                    info!("discovery proxy stopped");
                    ServerExit::Stopped
                }
                Err(e) => {
                    error!(error = %e, "discovery proxy failed");
                    ServerExit::Failed(e.to_string())
                }
            };
            let _ = exit_tx.send(exit);
        });

        ServerHandle { exit: exit_rx }
    }
}
