//! Service definitions, states and the `.service` file parser.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Type of service execution model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceType {
    /// Main process is the service
    #[default]
    Simple,
    /// Process forks to the background
    Forking,
    /// Runs once and exits; success is a clean exit
    Oneshot,
}

/// Current state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceState {
    /// Not running
    #[default]
    Stopped,
    /// Start in progress (dependencies, fork)
    Starting,
    /// Child is alive
    Running,
    /// Stop in progress
    Stopping,
    /// Exited non-zero, was signaled, or failed to start
    Failed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Stopped => write!(f, "stopped"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Stopping => write!(f, "stopping"),
            ServiceState::Failed => write!(f, "failed"),
        }
    }
}

/// Which startup bucket a service belongs to at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupBucket {
    /// Launched concurrently with the sequential walk
    Parallel,
    /// Launched one by one in definition order
    Sequential,
    /// Launched last, after the console is cleared
    Tty,
}

/// A service definition plus its runtime bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct Service {
    pub name: String,
    pub description: String,
    pub service_type: ServiceType,
    pub exec_start: String,
    pub exec_stop: Option<String>,
    /// TTY device to attach as controlling terminal
    pub tty_device: Option<PathBuf>,
    /// Hard dependencies, started recursively before this service
    pub requires: Vec<String>,
    /// Advisory ordering, waited on with a bounded timeout
    pub after: Vec<String>,
    pub restart_on_failure: bool,
    /// Seconds to wait before a scheduled restart
    pub restart_delay: u64,
    pub autostart: bool,
    pub parallel: bool,
    /// Attach stdio to /dev/console instead of a log file
    pub foreground: bool,
    /// Clear the attached terminal before exec
    pub clear_screen: bool,

    pub pid: Option<u32>,
    pub state: ServiceState,
    /// Monotonic failure counter, capped by the restart policy
    pub failures: u32,
    /// One outstanding restart per service
    pub restart_pending: bool,
}

impl Service {
    pub fn new(name: impl Into<String>, exec_start: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exec_start: exec_start.into(),
            restart_delay: 5,
            ..Default::default()
        }
    }

    /// The built-in emergency shell, used as the fallback tty service.
    pub fn fallback_shell() -> Self {
        let mut svc = Service::new("shell", "/bin/sh");
        svc.description = "Emergency Shell".to_string();
        svc.foreground = true;
        svc
    }

    /// Startup bucket for autostart ordering.
    pub fn bucket(&self) -> StartupBucket {
        if self.tty_device.is_some() || self.foreground {
            StartupBucket::Tty
        } else if self.parallel {
            StartupBucket::Parallel
        } else {
            StartupBucket::Sequential
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ServiceState::Running | ServiceState::Starting)
    }

    /// Parse a `.service` definition from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut svc = parse_service(&content).map_err(|reason| Error::InvalidServiceFile {
            path: path.to_path_buf(),
            reason,
        })?;
        if svc.name.is_empty() {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                svc.name = stem.to_string();
            }
        }
        if svc.name.is_empty() {
            return Err(Error::InvalidServiceFile {
                path: path.to_path_buf(),
                reason: "service has no name".to_string(),
            });
        }
        Ok(svc)
    }
}

/// Convert "yes/true/1" to bool; anything else is false.
pub fn string_to_bool(s: &str) -> bool {
    matches!(s, "true" | "yes" | "1")
}

/// Parse the INI-like `.service` grammar.
///
/// Sections in brackets, `key = value` lines with trimming and optional
/// double-quote stripping, `#` comments and blank lines ignored. Unknown
/// keys and unknown sections are ignored.
fn parse_service(content: &str) -> std::result::Result<Service, String> {
    let mut svc = Service {
        restart_delay: 5,
        ..Default::default()
    };
    let mut section = String::new();

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].to_string();
            continue;
        }
        let Some(eq) = line.find('=') else {
            continue;
        };
        let key = line[..eq].trim();
        let mut value = line[eq + 1..].trim();
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = &value[1..value.len() - 1];
        }

        match section.as_str() {
            "Service" => match key {
                "name" => svc.name = value.to_string(),
                "description" => svc.description = value.to_string(),
                "exec_start" => svc.exec_start = value.to_string(),
                "exec_stop" => svc.exec_stop = Some(value.to_string()),
                "tty" => svc.tty_device = Some(PathBuf::from(value)),
                "type" => {
                    svc.service_type = match value {
                        "simple" => ServiceType::Simple,
                        "forking" => ServiceType::Forking,
                        "oneshot" => ServiceType::Oneshot,
                        other => return Err(format!("unknown service type '{}'", other)),
                    }
                }
                "restart" => {
                    svc.restart_on_failure = matches!(value, "on-failure" | "always");
                }
                "restart_delay" => {
                    svc.restart_delay = value
                        .parse()
                        .map_err(|_| format!("invalid restart_delay '{}'", value))?;
                }
                "autostart" => svc.autostart = string_to_bool(value),
                "parallel" => svc.parallel = string_to_bool(value),
                "foreground" => svc.foreground = string_to_bool(value),
                "clear_screen" => svc.clear_screen = string_to_bool(value),
                _ => {}
            },
            "Dependencies" => match key {
                "requires" => {
                    svc.requires = value.split_whitespace().map(str::to_string).collect();
                }
                "after" => {
                    svc.after = value.split_whitespace().map(str::to_string).collect();
                }
                _ => {}
            },
            _ => {}
        }
    }

    Ok(svc)
}
