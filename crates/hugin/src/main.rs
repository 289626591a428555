//! Hugin, a personal media server.
//!
//! Serves an embedded front-end and a Munin album directory on a local
//! loopback port, and the same plus identity-gated endpoints over a private
//! overlay network.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kraweb::{HandlerRegistry, KraWeb, KrawebConfig, TailscaledOverlay, Visibility};

mod album;
mod dist;
mod tokens;

#[derive(Parser)]
#[command(name = "hugin")]
#[command(about = "Personal media server for Munin albums")]
#[command(version)]
struct Cli {
    /// Be verbose
    #[arg(long)]
    verbose: bool,

    /// If non-empty, listen on this addr in dev mode; don't join the overlay network
    #[arg(long = "dev-listen", default_value = "")]
    dev_listen: String,

    /// Path to the overlay auth key
    #[arg(long = "tailscale-auth-key-path")]
    tailscale_auth_key_path: Option<PathBuf>,

    /// Service name on the overlay network
    #[arg(long, default_value = kraweb::DEFAULT_HOSTNAME)]
    hostname: String,

    /// Directory containing a Munin album
    #[arg(long)]
    album: Option<PathBuf>,

    /// Overlay coordination server; if empty, upstream
    #[arg(long = "controlurl", default_value = "")]
    controlurl: String,

    /// Local address to bind
    #[arg(long, default_value = "127.0.0.1")]
    addr: String,

    /// Port to listen to locally
    #[arg(long, default_value_t = kraweb::DEFAULT_LOCAL_PORT)]
    port: u16,

    /// tailscaled LocalAPI socket
    #[arg(long, default_value = kraweb::DEFAULT_LOCALAPI_SOCKET)]
    tailscaled_socket: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    if let Err(err) = run(cli).await {
        error!("failed to start hugin: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut registry = HandlerRegistry::new();

    registry.register("/", dist::service(), Visibility::Public);

    match &cli.album {
        Some(dir) => {
            info!("serving content from {}", dir.display());
            registry.register("/album/", album::service(dir), Visibility::Public);
            registry.register("/content/", album::service(dir), Visibility::Public);
        }
        None => info!("--album is required to serve an album"),
    }

    registry.register("/tokens", tokens::service(), Visibility::OverlayOnly);

    let config = KrawebConfig {
        hostname: cli.hostname,
        auth_key_path: cli.tailscale_auth_key_path,
        control_url: cli.controlurl,
        verbose: cli.verbose,
        dev: cli.dev_listen,
        local_addr: cli.addr,
        local_port: cli.port,
    };

    let overlay = Arc::new(TailscaledOverlay::new(cli.tailscaled_socket));
    let server = KraWeb::new(config, registry, overlay);
    server.listen_and_serve().await?;
    Ok(())
}
