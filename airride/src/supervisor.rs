//! Service supervision: the registry, dependency-ordered startup,
//! stop/restart handling and restart scheduling.

use crate::error::{Error, Result};
use crate::process::{self, ExitStatus};
use crate::service::{Service, ServiceState, ServiceType, StartupBucket};
use nix::sys::signal::Signal;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct InitConfig {
    /// Directory scanned for `*.service` files
    pub services_dir: PathBuf,
    /// Control socket path
    pub socket_path: PathBuf,
    /// Directory for per-service log files
    pub log_dir: PathBuf,
    /// Mount virtual filesystems and create device nodes (PID 1 only)
    pub mount_filesystems: bool,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            services_dir: PathBuf::from("/etc/airride/services"),
            socket_path: PathBuf::from("/run/airride.sock"),
            log_dir: PathBuf::from("/var/log/airride"),
            mount_filesystems: true,
        }
    }
}

/// Shared service registry. A single lock guards every read and write;
/// blocking waits release it between polls.
#[derive(Default)]
struct Registry {
    services: HashMap<String, Service>,
    /// Definition order, used by the sequential bucket and `list`
    order: Vec<String>,
}

/// The service supervisor.
#[derive(Clone)]
pub struct Supervisor {
    registry: Arc<Mutex<Registry>>,
    config: Arc<InitConfig>,
}

impl Supervisor {
    pub fn new(config: InitConfig) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &InitConfig {
        &self.config
    }

    /// Load every `*.service` definition from the services directory and
    /// make sure the built-in fallback shell exists.
    pub async fn load_services(&self) -> Result<()> {
        let dir = &self.config.services_dir;
        if !dir.exists() {
            info!(dir = ?dir, "services directory does not exist, creating");
            std::fs::create_dir_all(dir)?;
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("service"))
            .collect();
        paths.sort();

        for path in paths {
            match Service::from_file(&path) {
                Ok(svc) => {
                    info!(service = %svc.name, "loaded service definition");
                    self.register(svc).await;
                }
                Err(e) => {
                    error!(path = ?path, error = %e, "failed to load service definition");
                }
            }
        }

        let mut reg = self.registry.lock().await;
        if !reg.services.contains_key("shell") {
            let shell = Service::fallback_shell();
            reg.order.push(shell.name.clone());
            reg.services.insert(shell.name.clone(), shell);
        }
        Ok(())
    }

    /// Register a service definition.
    pub async fn register(&self, svc: Service) {
        let mut reg = self.registry.lock().await;
        if reg.services.contains_key(&svc.name) {
            warn!(service = %svc.name, "duplicate service definition ignored");
            return;
        }
        reg.order.push(svc.name.clone());
        reg.services.insert(svc.name.clone(), svc);
    }

    /// Start a service, recursively starting its `requires` first.
    ///
    /// Returns Ok only once the service is running, or, for a oneshot,
    /// has completed with exit 0.
    pub async fn start_service(&self, name: &str) -> Result<()> {
        let (requires, after) = {
            let mut reg = self.registry.lock().await;
            let svc = reg
                .services
                .get_mut(name)
                .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
            match svc.state {
                ServiceState::Running => {
                    debug!(service = %name, "already running");
                    return Ok(());
                }
                // Re-entered while starting: a requires cycle.
                ServiceState::Starting => return Err(Error::DependencyCycle(name.to_string())),
                _ => {}
            }
            svc.state = ServiceState::Starting;
            (svc.requires.clone(), svc.after.clone())
        };

        for dep in &requires {
            if let Err(e) = Box::pin(self.start_service(dep)).await {
                self.set_state(name, ServiceState::Failed).await;
                return Err(Error::DependencyFailed {
                    service: name.to_string(),
                    dependency: dep.clone(),
                    reason: e.to_string(),
                });
            }
        }

        // Advisory ordering only: wait bounded, then proceed regardless.
        for dep in &after {
            self.wait_for_settled(dep).await;
        }

        let svc_def = {
            let reg = self.registry.lock().await;
            reg.services
                .get(name)
                .cloned()
                .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?
        };

        info!(service = %name, "starting service");
        let pid = match process::spawn(&svc_def, &self.config.log_dir) {
            Ok(pid) => pid,
            Err(e) => {
                self.set_state(name, ServiceState::Failed).await;
                error!(service = %name, error = %e, "failed to start service");
                return Err(Error::StartFailed {
                    name: name.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        {
            let mut reg = self.registry.lock().await;
            if let Some(svc) = reg.services.get_mut(name) {
                svc.pid = Some(pid);
                svc.state = ServiceState::Running;
            }
        }
        info!(service = %name, pid = pid, "service started");

        if svc_def.service_type == ServiceType::Oneshot {
            return self.wait_oneshot(name, pid).await;
        }
        Ok(())
    }

    /// Block (releasing the lock between polls) until a oneshot child
    /// finishes, then collapse its state to stopped or failed.
    async fn wait_oneshot(&self, name: &str, pid: u32) -> Result<()> {
        loop {
            {
                let reg = self.registry.lock().await;
                if let Some(svc) = reg.services.get(name) {
                    match svc.state {
                        ServiceState::Stopped => return Ok(()),
                        ServiceState::Failed => {
                            return Err(Error::StartFailed {
                                name: name.to_string(),
                                reason: "oneshot exited with failure".to_string(),
                            })
                        }
                        _ => {}
                    }
                }
            }
            match process::try_wait(pid)? {
                Some(status) if status.code.is_some() || status.signal.is_some() => {
                    self.apply_exit(status).await;
                }
                // Reaped by the main loop; its status lands in the registry.
                Some(_) | None => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    /// Stop a running service: SIGTERM, bounded poll, SIGKILL as a last
    /// resort. Idempotent on stopped services.
    pub async fn stop_service(&self, name: &str) -> Result<()> {
        let pid = {
            let mut reg = self.registry.lock().await;
            let svc = reg
                .services
                .get_mut(name)
                .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
            if !svc.is_active() {
                debug!(service = %name, "service not running");
                return Ok(());
            }
            let Some(pid) = svc.pid else {
                svc.state = ServiceState::Stopped;
                return Ok(());
            };
            svc.state = ServiceState::Stopping;
            pid
        };

        info!(service = %name, pid = pid, "stopping service");
        let _ = process::send_signal(pid, Signal::SIGTERM);

        let mut reaped = false;
        for _ in 0..50 {
            if matches!(process::try_wait(pid), Ok(Some(_))) {
                reaped = true;
                break;
            }
            if self.pid_cleared(name, pid).await {
                reaped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if !reaped {
            warn!(service = %name, pid = pid, "did not exit in time, sending SIGKILL");
            let _ = process::send_signal(pid, Signal::SIGKILL);
            for _ in 0..100 {
                if matches!(process::try_wait(pid), Ok(Some(_))) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        let mut reg = self.registry.lock().await;
        if let Some(svc) = reg.services.get_mut(name) {
            svc.pid = None;
            svc.state = ServiceState::Stopped;
        }
        info!(service = %name, "service stopped");
        Ok(())
    }

    /// Restart: stop, settle briefly, start.
    pub async fn restart_service(&self, name: &str) -> Result<()> {
        self.stop_service(name).await?;
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.start_service(name).await
    }

    /// Start every autostart service, bucketed: parallel workers plus the
    /// sequential walk, then the tty bucket last so login prompts paint
    /// over boot output.
    pub async fn autostart(&self) {
        let (parallel, sequential, tty) = {
            let reg = self.registry.lock().await;
            let mut parallel = Vec::new();
            let mut sequential = Vec::new();
            let mut tty = Vec::new();
            for name in &reg.order {
                let svc = &reg.services[name];
                if !svc.autostart {
                    continue;
                }
                match svc.bucket() {
                    StartupBucket::Parallel => parallel.push(name.clone()),
                    StartupBucket::Sequential => sequential.push(name.clone()),
                    StartupBucket::Tty => tty.push(name.clone()),
                }
            }
            (parallel, sequential, tty)
        };

        let mut workers = Vec::new();
        for name in parallel {
            let sup = self.clone();
            workers.push(tokio::spawn(async move {
                if let Err(e) = sup.start_service(&name).await {
                    error!(service = %name, error = %e, "failed to start service");
                }
            }));
        }
        for name in sequential {
            if let Err(e) = self.start_service(&name).await {
                error!(service = %name, error = %e, "failed to start service");
            }
        }
        for worker in workers {
            let _ = worker.await;
        }

        // Let network-ish services settle before the login prompts.
        tokio::time::sleep(Duration::from_millis(500)).await;
        clear_console();

        if tty.is_empty() {
            info!("no tty services, starting fallback shell");
            if let Err(e) = self.start_service("shell").await {
                error!(error = %e, "failed to start fallback shell");
            }
        } else {
            for name in tty {
                if let Err(e) = self.start_service(&name).await {
                    error!(service = %name, error = %e, "failed to start tty service");
                }
            }
        }
    }

    /// Drain zombies and route each exit to its owning service.
    pub async fn reap(&self) {
        for status in process::reap_zombies() {
            self.apply_exit(status).await;
        }
    }

    /// Record a child exit: expected stops become `stopped`, clean exits
    /// become `stopped`, everything else `failed` with restart scheduling
    /// per policy (capped, one outstanding restart per service).
    pub fn apply_exit<'a>(
        &'a self,
        status: ExitStatus,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let mut to_restart = None;
            {
                let mut reg = self.registry.lock().await;
                let Some(svc) = reg
                    .services
                    .values_mut()
                    .find(|s| s.pid == Some(status.pid))
                else {
                    debug!(pid = status.pid, "reaped unknown child");
                    return;
                };
                svc.pid = None;
                if svc.state == ServiceState::Stopping {
                    svc.state = ServiceState::Stopped;
                } else if status.success() {
                    info!(service = %svc.name, "service exited cleanly");
                    svc.state = ServiceState::Stopped;
                } else {
                    warn!(
                        service = %svc.name,
                        code = ?status.code,
                        signal = ?status.signal,
                        "service failed"
                    );
                    svc.state = ServiceState::Failed;
                    if svc.restart_on_failure && svc.failures < 10 && !svc.restart_pending {
                        svc.failures += 1;
                        svc.restart_pending = true;
                        to_restart = Some((svc.name.clone(), svc.restart_delay));
                    }
                }
            }

            if let Some((name, delay)) = to_restart {
                info!(service = %name, delay = delay, "scheduling restart");
                let sup = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    {
                        let mut reg = sup.registry.lock().await;
                        if let Some(svc) = reg.services.get_mut(&name) {
                            svc.restart_pending = false;
                        }
                    }
                    if let Err(e) = sup.start_service(&name).await {
                        error!(service = %name, error = %e, "restart failed");
                    }
                });
            }
        })
    }

    /// Stop every active service (shutdown path).
    pub async fn stop_all(&self) {
        let active: Vec<String> = {
            let reg = self.registry.lock().await;
            reg.order
                .iter()
                .filter(|n| reg.services[*n].is_active())
                .cloned()
                .collect()
        };
        for name in active {
            if let Err(e) = self.stop_service(&name).await {
                error!(service = %name, error = %e, "failed to stop service");
            }
        }
    }

    /// Status text for the control protocol.
    pub async fn status_text(&self, name: &str) -> String {
        let reg = self.registry.lock().await;
        match reg.services.get(name) {
            None => "Service not found\n".to_string(),
            Some(svc) => {
                let mut out = format!(
                    "Service: {}\nDescription: {}\nState: {}\n",
                    svc.name, svc.description, svc.state
                );
                if let Some(pid) = svc.pid {
                    out.push_str(&format!("PID: {}\n", pid));
                }
                if let Some(tty) = &svc.tty_device {
                    out.push_str(&format!("TTY: {}\n", tty.display()));
                }
                out
            }
        }
    }

    /// Listing text for the control protocol, in definition order.
    pub async fn list_text(&self) -> String {
        let reg = self.registry.lock().await;
        let mut out = String::from("Services:\n");
        for name in &reg.order {
            let svc = &reg.services[name];
            out.push_str(&format!("  {} - {}", name, svc.state));
            if svc.autostart {
                out.push_str(" [auto]");
            }
            if let Some(tty) = &svc.tty_device {
                out.push_str(&format!(" [{}]", tty.display()));
            }
            out.push('\n');
        }
        out
    }

    /// Current (state, pid) of a service.
    pub async fn service_state(&self, name: &str) -> Option<(ServiceState, Option<u32>)> {
        let reg = self.registry.lock().await;
        reg.services.get(name).map(|s| (s.state, s.pid))
    }

    /// Current failure count of a service.
    pub async fn failure_count(&self, name: &str) -> Option<u32> {
        let reg = self.registry.lock().await;
        reg.services.get(name).map(|s| s.failures)
    }

    async fn set_state(&self, name: &str, state: ServiceState) {
        let mut reg = self.registry.lock().await;
        if let Some(svc) = reg.services.get_mut(name) {
            svc.state = state;
        }
    }

    async fn pid_cleared(&self, name: &str, pid: u32) -> bool {
        let reg = self.registry.lock().await;
        reg.services.get(name).map_or(true, |s| s.pid != Some(pid))
    }

    /// Bounded wait for an `after` target to leave the `starting` state.
    /// Cycles or stalled targets degrade to the timeout; never fatal.
    async fn wait_for_settled(&self, dep: &str) {
        for _ in 0..100 {
            let settled = {
                let reg = self.registry.lock().await;
                match reg.services.get(dep) {
                    None => true,
                    Some(svc) => !matches!(svc.state, ServiceState::Starting),
                }
            };
            if settled {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        debug!(dependency = %dep, "after-wait timed out, proceeding");
    }
}

/// Clear the physical console so tty services paint over boot chatter.
fn clear_console() {
    use std::io::Write;
    if let Ok(mut console) = std::fs::OpenOptions::new().write(true).open("/dev/console") {
        let _ = console.write_all(b"\x1b[2J\x1b[H");
    }
}
