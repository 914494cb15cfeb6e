//! Error types for the package manager.

use thiserror::Error;

/// Result type alias for package manager operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Package manager errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("package not installed: {0}")]
    NotInstalled(String),

    #[error("circular dependency detected while resolving {0}")]
    CircularDependency(String),

    #[error("download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("sync failed: no mirror provided all binary repositories")]
    SyncFailed,

    #[error("archive error in {path}: {message}")]
    Archive { path: String, message: String },

    #[error("build failed for {package}: {message}")]
    BuildFailed { package: String, message: String },

    #[error("required build tool not found on PATH: {0}")]
    MissingTool(String),

    #[error("module rejected: {path}: {reason}")]
    ModuleRejected { path: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("user input error: {0}")]
    Dialog(#[from] dialoguer::Error),
}
