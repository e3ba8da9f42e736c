//! ASCII-Chat Discovery Service daemon.

use acds::config::ServerConfig;
use acds::server::{DiscoveryServer, write_identity};
use acip_crypto::IdentityKeypair;
use clap::{Parser, Subcommand};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// ASCII-Chat rendezvous and discovery server
#[derive(Parser)]
#[command(name = "acds")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "acds.toml")]
    config: PathBuf,

    /// TCP port for ACIP clients
    #[arg(long)]
    port: Option<u16>,

    /// TCP port for WebSocket clients
    #[arg(long)]
    websocket_port: Option<u16>,

    /// IPv4 bind address
    #[arg(long)]
    address: Option<Ipv4Addr>,

    /// IPv6 bind address
    #[arg(long)]
    address6: Option<Ipv6Addr>,

    /// Directory for the durable session store
    #[arg(long)]
    database_path: Option<PathBuf>,

    /// Require a valid identity signature on SESSION_CREATE
    #[arg(long)]
    require_server_identity: bool,

    /// Require a valid identity signature on SESSION_JOIN
    #[arg(long)]
    require_client_identity: bool,

    /// Do not keep the host machine awake while serving
    #[arg(long)]
    no_keepawake: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the discovery server (the default)
    Serve,
    /// Generate an Ed25519 identity seed file
    Keygen {
        /// Output file for the hex-encoded seed
        #[arg(short, long, default_value = "acds-identity.hex")]
        output: PathBuf,
    },
}

fn apply_overrides(config: &mut ServerConfig, cli: &Cli) {
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(port) = cli.websocket_port {
        config.websocket_port = port;
    }
    if cli.address.is_some() {
        config.address = cli.address;
    }
    if cli.address6.is_some() {
        config.address6 = cli.address6;
    }
    if let Some(path) = &cli.database_path {
        config.database_path = path.clone();
    }
    if cli.require_server_identity {
        config.require_server_identity = true;
    }
    if cli.require_client_identity {
        config.require_client_identity = true;
    }
    if cli.no_keepawake {
        config.keepawake = false;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" })),
        )
        .init();

    match cli.command {
        Some(Commands::Keygen { ref output }) => {
            let identity = IdentityKeypair::generate();
            write_identity(output, &identity)?;
            println!("identity: {}", hex::encode(identity.public_key()));
            println!("seed written to {}", output.display());
            Ok(())
        }
        Some(Commands::Serve) | None => serve(&cli).await,
    }
}

async fn serve(cli: &Cli) -> anyhow::Result<()> {
    let mut config = ServerConfig::load_or_default(&cli.config)?;
    apply_overrides(&mut config, cli);
    config.validate()?;

    let server = Arc::new(DiscoveryServer::new(config)?);
    let pool = server.worker_pool();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            pool.trigger_shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
