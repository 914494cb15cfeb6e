//! AirRide init binary.
//!
//! Runs as PID 1 on a real system; outside of PID 1 it runs in test mode
//! (no mounts, no device nodes) against whatever paths it is given.

use airride::{Init, InitConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "airride", about = "AirRide init system for Galactica Linux", version)]
struct Cli {
    /// Directory containing *.service definitions
    #[arg(long, default_value = "/etc/airride/services")]
    services_dir: PathBuf,

    /// Control socket path
    #[arg(long, default_value = "/run/airride.sock")]
    socket: PathBuf,

    /// Directory for per-service log files
    #[arg(long, default_value = "/var/log/airride")]
    log_dir: PathBuf,

    /// Skip mounting virtual filesystems even as PID 1
    #[arg(long)]
    no_mount: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = InitConfig {
        services_dir: cli.services_dir,
        socket_path: cli.socket,
        log_dir: cli.log_dir,
        mount_filesystems: !cli.no_mount,
    };

    Init::new(config).run().await?;
    Ok(())
}
