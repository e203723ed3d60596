//! meridiand — the Meridian daemon.
//!
//! One binary, two roles:
//! - `coordinator`: state store (redb), partition ring, capability
//!   registry, liveness sweeper and the `/v1` HTTP API
//! - `worker`: registers with a coordinator, heartbeats, and keeps the
//!   local assignment table current
//!
//! # Usage
//!
//! ```text
//! meridiand coordinator --listen 0.0.0.0:7700 --data-dir /var/lib/meridian
//! meridiand worker --coordinator http://10.0.0.1:7700 --id proxy-a --address 10.0.0.7:8980
//! ```

mod config;
mod coordinator_mode;
mod worker_mode;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{MeridianConfig, WorkerSection};

#[derive(Parser)]
#[command(name = "meridiand", about = "Meridian partitioned resource control plane")]
struct Cli {
    /// Path to meridian.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator.
    Coordinator {
        /// Address to serve the API on.
        #[arg(long)]
        listen: Option<String>,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Expected worker heartbeat interval, e.g. "5s".
        #[arg(long)]
        heartbeat_interval: Option<String>,

        /// Missed intervals before a worker is evicted.
        #[arg(long)]
        eviction_multiplier: Option<u32>,
    },
    /// Run a worker that joins a coordinator.
    Worker {
        /// Coordinator endpoint.
        #[arg(long)]
        coordinator: Option<String>,

        /// Worker id (defaults to the hostname).
        #[arg(long)]
        id: Option<String>,

        /// Address this worker advertises.
        #[arg(long)]
        address: Option<String>,

        #[arg(long)]
        region: Option<String>,

        /// Serve /healthz and /assignments on this address.
        #[arg(long)]
        status_listen: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut file = MeridianConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Coordinator {
            listen,
            data_dir,
            heartbeat_interval,
            eviction_multiplier,
        } => {
            let section = &mut file.coordinator;
            if let Some(listen) = listen {
                section.listen = listen;
            }
            if let Some(data_dir) = data_dir {
                section.data_dir = data_dir;
            }
            if let Some(interval) = heartbeat_interval {
                section.heartbeat_interval = interval;
            }
            if let Some(multiplier) = eviction_multiplier {
                section.eviction_multiplier = multiplier;
            }
            coordinator_mode::run_coordinator(file.coordinator).await
        }
        Command::Worker {
            coordinator,
            id,
            address,
            region,
            status_listen,
        } => {
            let mut section = match (file.worker.take(), coordinator, address) {
                (Some(mut section), coordinator, address) => {
                    if let Some(coordinator) = coordinator {
                        section.coordinator = coordinator;
                    }
                    if let Some(address) = address {
                        section.address = address;
                    }
                    section
                }
                (None, Some(coordinator), Some(address)) => WorkerSection::new(coordinator, address),
                (None, _, _) => anyhow::bail!(
                    "worker mode needs --coordinator and --address, or a [worker] section in the config file"
                ),
            };
            if id.is_some() {
                section.id = id;
            }
            if let Some(region) = region {
                section.region = region;
            }
            if status_listen.is_some() {
                section.status_listen = status_listen;
            }
            worker_mode::run_worker(section).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,meridiand=debug,meridian=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
