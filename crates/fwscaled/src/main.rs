//! fwscaled — the fwscale daemon.
//!
//! Single binary that assembles the coordinator:
//! - Record store (redb)
//! - Platform (static VM inventory from the config file)
//! - HTTP API (heartbeats + record inspection)
//!
//! # Usage
//!
//! ```text
//! fwscaled init --scaling-group fgt-byol --vm-id i-0abc --private-ip 10.0.1.10 > fwscale.toml
//! fwscaled run --config fwscale.toml --port 8443
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fwscale_api::{build_router, ApiState};
use fwscale_autoscale::InventoryPlatform;
use fwscale_core::FwscaleConfig;
use fwscale_state::StateStore;

const DEFAULT_LOG_FILTER: &str = "info,fwscaled=debug,fwscale=debug";

#[derive(Parser)]
#[command(name = "fwscaled", about = "FortiGate autoscale coordinator daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve heartbeats for the VMs listed in the config file.
    Run {
        /// Path to fwscale.toml.
        #[arg(long, default_value = "fwscale.toml")]
        config: PathBuf,

        /// Override the configured listen port.
        #[arg(long)]
        port: Option<u16>,

        /// Override the configured data directory.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print a starter config with a one-VM inventory.
    Init {
        #[arg(long)]
        scaling_group: String,

        #[arg(long)]
        vm_id: String,

        #[arg(long)]
        private_ip: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
        } => run(&config, port, data_dir).await,
        Command::Init {
            scaling_group,
            vm_id,
            private_ip,
        } => {
            let config = FwscaleConfig::scaffold(&scaling_group, &vm_id, &private_ip);
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Load the config file and apply command-line overrides.
fn load_config(
    path: &Path,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<FwscaleConfig> {
    let mut config = FwscaleConfig::from_file(path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(data_dir) = data_dir {
        config.server.data_dir = data_dir;
    }
    Ok(config)
}

async fn run(path: &Path, port: Option<u16>, data_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(path, port, data_dir)?;
    info!(
        preferred_group = %config.settings.preferred_scaling_group,
        vms = config.vms.len(),
        "fwscale daemon starting"
    );

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("fwscale.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "record store opened");

    let platform = InventoryPlatform::new(config.vms);
    let state = ApiState {
        store: Arc::new(store),
        platform: Arc::new(platform),
        settings: config.settings,
    };

    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("fwscale daemon stopped");
    Ok(())
}
