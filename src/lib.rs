//! Dataplane - a per-instance sidecar for a managed proxy engine.
//!
//! The sidecar runs next to the engine and multiplexes several independent
//! servers in one process. None of them talk to each other; they share only
//! the configuration, the logger, the metrics sink and, for the control-plane
//! facing ones, a single upstream connection and token.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           dataplane                              │
//! │                                                                  │
//! │  engine ──ADS──▶ ┌──────────────────┐                           │
//! │                  │ Discovery proxy  │──┐                         │
//! │                  └──────────────────┘  │   ┌──────────────────┐  │
//! │                                        ├──▶│ Upstream channel │──┼─▶ control plane
//! │  clients ─DNS──▶ ┌──────────────────┐  │   │ + token          │  │
//! │   (UDP/TCP)      │ DNS proxy        │──┘   └──────────────────┘  │
//! │                  └──────────────────┘                            │
//! │                                                                  │
//! │  orchestrator ─▶ ┌──────────────────┐                            │
//! │                  │ Lifecycle        │──drain / quit──▶ engine admin
//! │                  └──────────────────┘                            │
//! │  scraper ──────▶ ┌──────────────────┐                            │
//! │                  │ Metrics merge    │──scrape──▶ engine + app    │
//! │                  └──────────────────┘                            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use dataplane::{Config, DiscoveryProxy, RecorderSink, Upstream};
//! use tripwire::Tripwire;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), dataplane::Error> {
//!     let config: Config = load_config();
//!     let (tripwire, worker) = Tripwire::new_signals();
//!     tokio::spawn(worker);
//!
//!     let upstream = Upstream::connect(&config.control_plane).await?;
//!     let proxy = DiscoveryProxy::setup(&config.discovery, &upstream, RecorderSink::shared()).await?;
//!     let mut handle = proxy.serve(tripwire);
//!     println!("discovery proxy exited: {:?}", handle.exited().await);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod discovery;
pub mod dns;
pub mod engine;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod merge;
pub mod metrics;
pub mod telemetry;
pub mod upstream;
pub mod wire;

// Re-export main types
pub use backend::{DnsBackend, GrpcDnsBackend, Protocol};
pub use config::{
    Config, ControlPlaneConfig, DiscoveryConfig, DnsProxyConfig, LifecycleConfig,
    MetricsMergeConfig, TelemetryConfig,
};
pub use discovery::{DiscoveryProxy, ServerExit, ServerHandle};
pub use dns::DnsProxy;
pub use error::Error;
pub use lifecycle::LifecycleController;
pub use merge::MetricsMerge;
pub use metrics::{MetricsSink, RecorderSink, SharedSink};
pub use upstream::{Token, Upstream};
