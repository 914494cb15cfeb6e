//! Control client for a running AirRide init.
//!
//! Sends one command over the control socket, prints the response and
//! exits non-zero if the supervisor reported failure.

use clap::{Parser, Subcommand};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "airridectl", about = "Manage AirRide services", version)]
struct Cli {
    /// Control socket path
    #[arg(long, default_value = "/run/airride.sock")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a service
    Start { service: String },
    /// Stop a service
    Stop { service: String },
    /// Restart a service
    Restart { service: String },
    /// Show service status
    Status { service: String },
    /// List all services
    List,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let request = match &cli.command {
        Command::Start { service } => format!("start {}", service),
        Command::Stop { service } => format!("stop {}", service),
        Command::Restart { service } => format!("restart {}", service),
        Command::Status { service } => format!("status {}", service),
        Command::List => "list".to_string(),
    };

    let mut stream = UnixStream::connect(&cli.socket).map_err(|e| {
        anyhow::anyhow!(
            "cannot connect to AirRide at {}: {} (is it running?)",
            cli.socket.display(),
            e
        )
    })?;
    stream.write_all(request.as_bytes())?;
    stream.shutdown(std::net::Shutdown::Write)?;

    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    print!("{}", response);

    if response.contains("FAILED") {
        std::process::exit(1);
    }
    Ok(())
}
