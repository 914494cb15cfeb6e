//! Error types for the login program.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to bind tty {device}: {reason}")]
    TtyBind { device: String, reason: String },

    #[error("user lookup failed for {0}")]
    UnknownUser(String),

    #[error("privilege drop verification failed for {0}")]
    PrivilegeDrop(String),

    #[error("failed to execute shell {shell}: {reason}")]
    ShellExec { shell: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("system error: {0}")]
    Nix(#[from] nix::Error),
}
