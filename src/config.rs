//! Configuration types for the dataplane sidecar.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Prefix selecting a Unix-domain socket for the discovery proxy listener.
pub const UNIX_SOCKET_PREFIX: &str = "unix://";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upstream control plane connection.
    pub control_plane: ControlPlaneConfig,

    /// Discovery-stream proxy configuration.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// DNS proxy configuration.
    #[serde(default)]
    pub dns: DnsProxyConfig,

    /// Graceful shutdown endpoint configuration.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Merged metrics endpoint configuration.
    #[serde(default)]
    pub metrics: MetricsMergeConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Upstream control plane connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// gRPC endpoint of the control plane (e.g., "http://127.0.0.1:8502").
    pub addr: String,

    /// Bearer token injected into every proxied call.
    #[serde(default)]
    pub token: String,
}

/// Discovery-stream proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Bind host, or `unix:///path/to/socket` for a Unix-domain listener.
    #[serde(default = "default_discovery_bind_addr")]
    pub bind_addr: String,

    /// TCP port; `0` picks an ephemeral port. Ignored for Unix sockets.
    #[serde(default)]
    pub port: u16,
}

impl DiscoveryConfig {
    /// Socket path if the bind address selects a Unix-domain listener.
    pub fn unix_path(&self) -> Option<&str> {
        self.bind_addr.strip_prefix(UNIX_SOCKET_PREFIX)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_discovery_bind_addr(),
            port: 0,
        }
    }
}

/// DNS proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsProxyConfig {
    /// Address to bind both the UDP socket and the TCP listener on.
    #[serde(default = "default_bind_ip")]
    pub bind_addr: IpAddr,

    /// Port; negative disables the server, `0` picks an ephemeral port.
    #[serde(default = "default_dns_port")]
    pub port: i32,
}

impl Default for DnsProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_ip(),
            port: default_dns_port(),
        }
    }
}

/// Graceful shutdown endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Address for the control HTTP server.
    #[serde(default = "default_bind_ip")]
    pub bind_addr: IpAddr,

    /// Port for the control HTTP server.
    #[serde(default = "default_lifecycle_port")]
    pub port: u16,

    /// HTTP path that triggers a graceful shutdown.
    #[serde(default = "default_shutdown_path")]
    pub shutdown_path: String,

    /// Upper bound on how long draining may take, in seconds.
    #[serde(default = "default_grace_period_seconds")]
    pub grace_period_seconds: u64,

    /// Drain inbound listeners before quitting.
    #[serde(default = "default_true")]
    pub drain_listeners: bool,

    /// Base URL of the managed engine's admin API.
    #[serde(default = "default_engine_admin_url")]
    pub engine_admin_url: String,

    /// Deadline for each admin API call, in seconds.
    #[serde(default = "default_admin_timeout_seconds")]
    pub admin_timeout_seconds: u64,
}

impl LifecycleConfig {
    /// Grace period as a `Duration`.
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_seconds)
    }

    /// Admin API call deadline as a `Duration`.
    pub fn admin_timeout(&self) -> Duration {
        Duration::from_secs(self.admin_timeout_seconds)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_ip(),
            port: default_lifecycle_port(),
            shutdown_path: default_shutdown_path(),
            grace_period_seconds: default_grace_period_seconds(),
            drain_listeners: true,
            engine_admin_url: default_engine_admin_url(),
            admin_timeout_seconds: default_admin_timeout_seconds(),
        }
    }
}

/// Merged metrics endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsMergeConfig {
    /// Address for the metrics HTTP server.
    #[serde(default = "default_bind_ip")]
    pub bind_addr: IpAddr,

    /// Port for the metrics HTTP server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,

    /// HTTP path serving the merged exposition.
    #[serde(default = "default_metrics_path")]
    pub path: String,

    /// The engine's local Prometheus endpoint (always scraped first).
    #[serde(default = "default_engine_metrics_url")]
    pub engine_metrics_url: String,

    /// Optional application metrics endpoint, scraped second.
    #[serde(default)]
    pub app_metrics_url: Option<String>,
}

impl Default for MetricsMergeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_ip(),
            port: default_metrics_port(),
            path: default_metrics_path(),
            engine_metrics_url: default_engine_metrics_url(),
            app_metrics_url: None,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "dataplane=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus exporter address for the sidecar's own metrics.
    #[serde(default)]
    pub prometheus_addr: Option<std::net::SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_discovery_bind_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_dns_port() -> i32 {
    -1
}

fn default_lifecycle_port() -> u16 {
    20300
}

fn default_shutdown_path() -> String {
    "/graceful_shutdown".to_string()
}

fn default_grace_period_seconds() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

fn default_engine_admin_url() -> String {
    "http://127.0.0.1:19000".to_string()
}

fn default_admin_timeout_seconds() -> u64 {
    5
}

fn default_metrics_port() -> u16 {
    20100
}

fn default_metrics_path() -> String {
    "/stats/prometheus".to_string()
}

fn default_engine_metrics_url() -> String {
    "http://127.0.0.1:19000/stats/prometheus".to_string()
}
