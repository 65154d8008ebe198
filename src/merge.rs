//! Merged Prometheus endpoint.
//!
//! Each request scrapes the engine's metrics and, if configured, the
//! application's, and returns them concatenated. Scrapes are sequential and
//! synchronous with the request.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::MetricsMergeConfig;
use crate::engine::ensure_success;
use crate::error::Error;
use crate::http::HttpServer;
use crate::wire;

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Serves the merged metrics endpoint.
pub struct MetricsMerge {
    server: Arc<HttpServer>,
    sources: Sources,
    path: String,
}

/// Endpoints to scrape, in order.
#[derive(Debug, Clone)]
struct Sources {
    client: reqwest::Client,
    urls: Arc<[String]>,
}

impl MetricsMerge {
    /// Create a stopped merge server.
    pub fn new(config: MetricsMergeConfig) -> Result<Self, Error> {
        if !config.path.starts_with('/') {
            return Err(Error::Config(format!(
                "metrics path must start with '/': {}",
                config.path
            )));
        }

        let urls: Vec<String> = std::iter::once(config.engine_metrics_url)
            .chain(config.app_metrics_url)
            .collect();

        Ok(Self {
            server: Arc::new(HttpServer::new(
                "metrics",
                SocketAddr::new(config.bind_addr, config.port),
            )),
            sources: Sources {
                client: reqwest::Client::new(),
                urls: urls.into(),
            },
            path: config.path,
        })
    }

    /// Start serving. A no-op if already running; stops itself once
    /// `shutdown` resolves.
    pub fn start<F>(&self, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = Router::new()
            .route(&self.path, get(merged_metrics))
            .with_state(self.sources.clone());
        self.server.start(app, shutdown)
    }

    /// Stop serving.
    pub fn stop(&self) {
        self.server.stop();
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }
}

/// Scrape every source in order, stopping at the first failure.
///
/// On failure the output gathered so far is kept and the error message
/// appended, under a 500 status.
async fn merged_metrics(State(sources): State<Sources>) -> Response {
    let mut body = BytesMut::new();

    for url in sources.urls.iter() {
        match scrape(&sources.client, url).await {
            Ok(exposition) => {
                debug!(url = %url, len = exposition.len(), "scraped metrics");
                wire::append_exposition(&mut body, &exposition);
            }
            Err(e) => {
                warn!(url = %url, error = %e, "metrics scrape failed");
                wire::append_exposition(&mut body, format!("{}\n", e).as_bytes());
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(CONTENT_TYPE, "text/plain; charset=utf-8")],
                    body.freeze(),
                )
                    .into_response();
            }
        }
    }

    (
        StatusCode::OK,
        [(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        body.freeze(),
    )
        .into_response()
}

async fn scrape(client: &reqwest::Client, url: &str) -> Result<Bytes, Error> {
    let failed = |reason: String| Error::Upstream {
        url: url.to_string(),
        reason,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?;
    ensure_success(url, response.status())?;
    response.bytes().await.map_err(|e| failed(e.to_string()))
}
