//! Error types for the AirRide init system.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for init system operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the init system.
#[derive(Error, Debug)]
pub enum Error {
    /// Service not found in the registry
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// Service failed to start
    #[error("service failed to start: {name}: {reason}")]
    StartFailed { name: String, reason: String },

    /// A required dependency failed to start
    #[error("dependency {dependency} of {service} failed: {reason}")]
    DependencyFailed {
        service: String,
        dependency: String,
        reason: String,
    },

    /// Cycle in the requires graph
    #[error("dependency cycle while starting {0}")]
    DependencyCycle(String),

    /// Malformed service definition file
    #[error("invalid service file {path}: {reason}")]
    InvalidServiceFile { path: PathBuf, reason: String },

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    /// Control socket error
    #[error("control socket error: {0}")]
    ControlSocket(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Nix error
    #[error("system error: {0}")]
    Nix(#[from] nix::Error),
}
