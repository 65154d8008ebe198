//! Graceful shutdown of the managed engine.
//!
//! A request to the shutdown path races two things: a worker that drains
//! the engine's inbound listeners and waits for their connections to close,
//! and a timer set to the grace period. Whichever finishes first wins; the
//! engine is then told to quit and the request is answered.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::any;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::LifecycleConfig;
use crate::engine::EngineAdmin;
use crate::error::Error;
use crate::http::HttpServer;
use crate::metrics::{self, SharedSink};

/// How often open connections are counted while draining.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Serves the graceful shutdown endpoint.
pub struct LifecycleController {
    server: Arc<HttpServer>,
    shutdown: Shutdown,
    path: String,
}

/// State shared by every shutdown request.
#[derive(Clone)]
struct Shutdown {
    engine: EngineAdmin,
    grace_period: Duration,
    drain_listeners: bool,
    sink: SharedSink,
}

/// Which side of the race let the shutdown continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Drained,
    GracePeriodElapsed,
}

impl LifecycleController {
    /// Create a stopped controller.
    pub fn new(config: LifecycleConfig, sink: SharedSink) -> Result<Self, Error> {
        if !config.shutdown_path.starts_with('/') {
            return Err(Error::Config(format!(
                "shutdown path must start with '/': {}",
                config.shutdown_path
            )));
        }

        let addr = SocketAddr::new(config.bind_addr, config.port);
        let client = reqwest::Client::builder()
            .timeout(config.admin_timeout())
            .build()?;
        let engine = EngineAdmin::new(client, &config.engine_admin_url);

        Ok(Self {
            server: Arc::new(HttpServer::new("lifecycle", addr)),
            shutdown: Shutdown {
                engine,
                grace_period: config.grace_period(),
                drain_listeners: config.drain_listeners,
                sink,
            },
            path: config.shutdown_path,
        })
    }

    /// Start the control server. A no-op if already running; stops itself
    /// once `shutdown` resolves.
    pub fn start<F>(&self, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = Router::new()
            .route(&self.path, any(graceful_shutdown))
            .with_state(self.shutdown.clone());
        self.server.start(app, shutdown)
    }

    /// Stop the control server.
    pub fn stop(&self) {
        self.server.stop();
    }

    /// Whether the control server is running.
    pub fn is_running(&self) -> bool {
        self.server.is_running()
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }
}

/// Handler for the shutdown path.
///
/// Concurrent requests are not deduplicated: each runs its own race.
async fn graceful_shutdown(State(shutdown): State<Shutdown>) -> (StatusCode, String) {
    metrics::record_shutdown(&*shutdown.sink);
    info!(grace_period = ?shutdown.grace_period, "graceful shutdown requested");

    match shutdown.race().await {
        Trigger::Drained => info!("engine drained, shutting down"),
        Trigger::GracePeriodElapsed => info!("grace period elapsed, shutting down"),
    }

    match shutdown.engine.quit().await {
        Ok(()) => (StatusCode::OK, "shutdown initiated\n".to_string()),
        Err(e) => {
            error!(error = %e, "failed to shut down engine");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to shut down engine: {}\n", e),
            )
        }
    }
}

impl Shutdown {
    /// Run the drain worker against the grace period timer, once.
    async fn race(&self) -> Trigger {
        let (done_tx, done_rx) = oneshot::channel::<bool>();
        let worker = self.clone();
        tokio::spawn(async move {
            let finished = tokio::time::timeout(worker.grace_period, worker.drain())
                .await
                .is_ok();
            if !finished {
                debug!("drain worker gave up at the grace period");
            }
            let _ = done_tx.send(finished);
        });

        tokio::select! {
            finished = done_rx => match finished {
                Ok(true) => Trigger::Drained,
                _ => Trigger::GracePeriodElapsed,
            },
            _ = tokio::time::sleep(self.grace_period) => Trigger::GracePeriodElapsed,
        }
    }

    /// Drain inbound listeners and wait until no connections remain.
    async fn drain(&self) {
        if !self.drain_listeners {
            return;
        }

        if let Err(e) = self.engine.drain_inbound().await {
            warn!(error = %e, "failed to drain engine listeners");
            return;
        }

        loop {
            match self.engine.active_connections().await {
                Ok(0) => {
                    info!("all inbound connections closed");
                    return;
                }
                Ok(active) => debug!(active, "waiting for inbound connections to close"),
                Err(e) => warn!(error = %e, "failed to count engine connections"),
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}
