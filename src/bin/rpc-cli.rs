use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;

use micro_rpc::client::{DialOptions, RpcClient, ServerTarget};
use micro_rpc::config::load_config;
use micro_rpc::resilience::retry_never;
use micro_rpc::Context;

const DEFAULT_TARGET: &str = "target";

#[derive(Parser)]
#[command(name = "rpc-cli")]
#[command(about = "Management CLI for micro-rpc servers", long_about = None)]
struct Cli {
    /// Server address (host:port, or a socket path with --network unix)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[arg(long, default_value = "tcp")]
    network: String,

    /// CA certificate (PEM); enables TLS together with --server-name
    #[arg(long, requires = "server_name")]
    ca: Option<PathBuf>,

    #[arg(long, requires = "ca")]
    server_name: Option<String>,

    /// Call timeout in milliseconds
    #[arg(short, long, default_value_t = 3000)]
    timeout_ms: u64,

    /// Runtime config file; takes pools, timeouts, breakers and targets from
    /// its [client] and [breaker] sections instead of the flags above
    #[arg(short, long, requires = "target")]
    config: Option<PathBuf>,

    /// Name of a server from the config's [client.servers] table
    #[arg(long, requires = "config")]
    target: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the server answers Health.Ping
    Ping,
    /// Invoke Service.Method with a JSON argument
    Call {
        method: String,
        #[arg(default_value = "null")]
        body: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (opts, target) = match (&cli.config, cli.target) {
        (Some(path), Some(name)) => (DialOptions::from_runtime_config(&load_config(path)?), name),
        _ => {
            let mut target = ServerTarget::tcp(cli.server);
            target.network = cli.network;
            if let (Some(ca), Some(name)) = (cli.ca, cli.server_name) {
                target = target.with_tls(ca, name);
            }
            let opts = DialOptions::new()
                .with_server(DEFAULT_TARGET, target)
                .with_pool_size(1)
                .with_connect_timeout(Duration::from_millis(cli.timeout_ms))
                .with_request_timeout(Duration::from_millis(cli.timeout_ms))
                .with_retry(retry_never());
            (opts, DEFAULT_TARGET.to_string())
        }
    };
    let client = RpcClient::connect(opts).await?;
    let ctx = Context::background();

    let (method, body) = match cli.command {
        Commands::Ping => ("Health.Ping".to_string(), Value::Null),
        Commands::Call { method, body } => (method, serde_json::from_str(&body)?),
    };
    let request = client.new_request(&target, &method, &body)?;
    let result = client.call::<Value>(&ctx, request).await;
    client.close();

    match result {
        Ok(reply) => {
            println!("{}", serde_json::to_string_pretty(&reply)?);
            Ok(())
        }
        Err(err) => {
            eprintln!("Error: {} (code {})", err, err.code());
            std::process::exit(1);
        }
    }
}
