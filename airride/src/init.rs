//! Init orchestration: the boot sequence and the supervisor main loop.

use crate::control::{self, ControlServer};
use crate::error::Result;
use crate::mounts;
use crate::supervisor::{InitConfig, Supervisor};
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// The init system.
pub struct Init {
    supervisor: Supervisor,
}

impl Init {
    pub fn new(config: InitConfig) -> Self {
        Self {
            supervisor: Supervisor::new(config),
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Bring the system up and run the main loop until shutdown.
    pub async fn run(&self) -> Result<()> {
        let pid1 = std::process::id() == 1;
        info!(pid = std::process::id(), "AirRide init starting");
        if !pid1 {
            warn!("not running as PID 1, running in test mode");
        }

        if pid1 && self.supervisor.config().mount_filesystems {
            mounts::mount_filesystems();
            mounts::create_device_nodes();
        }
        mounts::apply_hostname();

        // Failure to bind the control socket directory is fatal; init
        // without a control plane is unmanageable.
        let server = ControlServer::bind(&self.supervisor.config().socket_path)?;

        self.supervisor.load_services().await?;
        self.supervisor.autostart().await;
        info!("system initialized, use airridectl to manage services");

        self.main_loop(server).await?;

        info!("shutting down");
        self.supervisor.stop_all().await;
        Ok(())
    }

    /// One control command per iteration, zombies reaped on SIGCHLD and
    /// on a periodic tick, shutdown on SIGTERM/SIGINT.
    async fn main_loop(&self, server: ControlServer) -> Result<()> {
        let mut sigchld = signal(SignalKind::child())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut tick = tokio::time::interval(Duration::from_millis(100));

        loop {
            tokio::select! {
                conn = server.accept() => {
                    match conn {
                        Ok(stream) => control::handle_connection(stream, &self.supervisor).await,
                        Err(e) => warn!(error = %e, "control accept failed"),
                    }
                }
                _ = sigchld.recv() => {
                    self.supervisor.reap().await;
                }
                _ = tick.tick() => {
                    self.supervisor.reap().await;
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM");
                    break;
                }
                _ = sigint.recv() => {
                    info!("received SIGINT");
                    break;
                }
            }
        }
        Ok(())
    }
}
