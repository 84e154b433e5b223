//! CLI entrypoint: binds a TCP address, initializes tracing, constructs
//! the process-wide [`Metrics`] counters, and serves the `Destination`
//! gRPC service (§6). Mirrors `pgtrickle-tui`/`pgtrickle-relay`'s
//! clap-derive-plus-env CLI shape and `tracing-subscriber` env-filter
//! setup from the same example pack.

use std::net::SocketAddr;

use clap::Parser;
use tonic::transport::Server;

use surreal_fivetran_destination::metrics::Metrics;
use surreal_fivetran_destination::rpc::pb::destination_server::DestinationServer;
use surreal_fivetran_destination::rpc::DestinationService;

/// Fivetran destination connector for SurrealDB.
#[derive(Debug, Parser)]
#[command(name = "surreal-fivetran-destination", version, about)]
struct Cli {
    /// Address the gRPC server listens on.
    #[arg(long, env = "SURREAL_FIVETRAN_LISTEN_ADDR", default_value = "0.0.0.0:50051")]
    listen_addr: SocketAddr,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    // SURREAL_FIVETRAN_DEBUG (§6) forces verbose logging for local/test
    // runs without requiring callers to know RUST_LOG's syntax; RUST_LOG,
    // when set, always wins.
    let default_filter = if std::env::var_os("SURREAL_FIVETRAN_DEBUG").is_some() {
        "debug"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .json()
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    let metrics = Metrics::new();
    let service = DestinationService::new(metrics);

    tracing::info!(addr = %cli.listen_addr, "starting surreal-fivetran-destination");

    Server::builder()
        .add_service(DestinationServer::new(service))
        .serve_with_shutdown(cli.listen_addr, shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    tracing::info!("shutdown signal received");
}
