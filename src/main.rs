//! micro-rpc server
//!
//! Loads a TOML configuration, installs logging and (optionally) the
//! Prometheus exporter, and serves the built-in `Health` service until
//! SIGINT or SIGTERM.
//!
//! ```text
//!   rpc-cli / RpcClient ──frames──▶ RpcServer ──▶ handler wrappers ──▶ Health.Ping
//!                                       │                               Health.Echo
//!                                       └── graceful stop on SIGINT / SIGTERM
//! ```

use std::path::PathBuf;

use clap::Parser;

use micro_rpc::config::{load_config, RuntimeConfig};
use micro_rpc::lifecycle::{spawn_signal_handler, Shutdown};
use micro_rpc::observability::{logging, metrics, TraceHandlerWrapper};
use micro_rpc::server::{health_service, RpcServer, ServerOptions};

#[derive(Parser)]
#[command(name = "micro-rpc")]
#[command(about = "RPC server bootstrap", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration (e.g. ":9000").
    #[arg(short, long)]
    address: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => RuntimeConfig::default(),
    };

    logging::init_logging(&config.observability.log_level)?;
    tracing::info!("micro-rpc v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let opts = ServerOptions::from_config(&config.server).with_wrapper(TraceHandlerWrapper);
    let server = RpcServer::new(opts);
    server.register(health_service())?;

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    spawn_signal_handler(shutdown);

    let address = args.address.or(config.server.address);
    let addrs: Vec<&str> = address.as_deref().into_iter().collect();
    server.run_until(&addrs, signal).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
