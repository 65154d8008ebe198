//! dataplane binary entry point.

use clap::Parser;
use dataplane::{
    telemetry, Config, DiscoveryProxy, DnsProxy, Error, GrpcDnsBackend, LifecycleController,
    MetricsMerge, RecorderSink, ServerExit, Upstream,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tripwire::Tripwire;

/// Sidecar for a managed proxy engine: discovery proxy, DNS proxy,
/// graceful shutdown and merged metrics.
#[derive(Parser, Debug)]
#[command(name = "dataplane")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "dataplane.toml", env = "DATAPLANE_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()).required(false))
        .add_source(
            config::Environment::with_prefix("DATAPLANE")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        control_plane = %config.control_plane.addr,
        discovery = %config.discovery.bind_addr,
        dns_port = config.dns.port,
        "Starting dataplane"
    );

    // Setup graceful shutdown
    let (tripwire, tripwire_worker) = Tripwire::new_signals();
    tokio::spawn(tripwire_worker);

    let sink = RecorderSink::shared();
    let upstream = Upstream::connect(&config.control_plane).await?;

    // Discovery proxy
    let discovery = DiscoveryProxy::setup(&config.discovery, &upstream, sink.clone()).await?;
    let mut discovery = discovery.serve(tripwire.clone());

    // DNS proxy
    let mut dns = DnsProxy::new(
        config.dns.clone(),
        Arc::new(GrpcDnsBackend::new(upstream.clone())),
        sink.clone(),
    );
    match dns.run().await {
        Ok(()) => dns.stop_on(tripwire.clone()),
        Err(Error::DnsDisabled) => info!("DNS proxy disabled"),
        Err(e) => return Err(e.into()),
    }

    // Graceful shutdown endpoint
    let lifecycle = LifecycleController::new(config.lifecycle.clone(), sink.clone())?;
    lifecycle.start(tripwire.clone())?;

    // Merged metrics endpoint
    let merge = MetricsMerge::new(config.metrics.clone())?;
    merge.start(tripwire.clone())?;

    // Run until shutdown is requested or the discovery proxy dies
    let exit = tokio::select! {
        _ = tripwire.clone() => {
            info!("shutdown requested");
            discovery.exited().await
        }
        exit = discovery.exited() => exit,
    };

    dns.stop();
    lifecycle.stop();
    merge.stop();

    if let ServerExit::Failed(reason) = exit {
        error!(%reason, "discovery proxy exited");
        return Err(reason.into());
    }

    info!("dataplane shutdown complete");
    Ok(())
}
