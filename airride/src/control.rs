//! Control socket server.
//!
//! Line-oriented request/response over a Unix stream socket. One command
//! per accepted connection: the server reads at most 1024 bytes, writes
//! one response and closes.

use crate::error::{Error, Result};
use crate::supervisor::Supervisor;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

/// Default path for the control socket.
pub const DEFAULT_SOCKET: &str = "/run/airride.sock";

/// A parsed control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Start(String),
    Stop(String),
    Restart(String),
    Status(String),
    List,
    Unknown,
}

/// Parse `verb [service]` from a raw request line.
pub fn parse_request(raw: &str) -> Request {
    let mut words = raw.split_whitespace();
    let verb = words.next().unwrap_or("");
    let name = words.next().unwrap_or("").to_string();
    match verb {
        "start" if !name.is_empty() => Request::Start(name),
        "stop" if !name.is_empty() => Request::Stop(name),
        "restart" if !name.is_empty() => Request::Restart(name),
        "status" if !name.is_empty() => Request::Status(name),
        "list" => Request::List,
        _ => Request::Unknown,
    }
}

/// Control socket server bound by the supervisor at boot.
pub struct ControlServer {
    socket_path: PathBuf,
    listener: UnixListener,
}

impl ControlServer {
    /// Bind the control socket. Failure to create the socket directory is
    /// fatal to the caller.
    pub fn bind(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)
            .map_err(|e| Error::ControlSocket(format!("bind {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "control socket listening");
        Ok(Self {
            socket_path: path.to_path_buf(),
            listener,
        })
    }

    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::ControlSocket(format!("accept: {}", e)))?;
        Ok(stream)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(error = %e, "failed to remove control socket");
            }
        }
    }
}

/// Handle one connection: read one command, dispatch, write one response,
/// close.
pub async fn handle_connection(mut stream: UnixStream, supervisor: &Supervisor) {
    let mut buf = [0u8; 1024];
    let n = match stream.read(&mut buf).await {
        Ok(n) => n,
        Err(e) => {
            debug!(error = %e, "control read failed");
            return;
        }
    };
    let raw = String::from_utf8_lossy(&buf[..n]);
    let request = parse_request(&raw);
    debug!(request = ?request, "control request");

    let response = match request {
        Request::Start(name) => ok_failed(supervisor.start_service(&name).await.is_ok()),
        Request::Stop(name) => ok_failed(supervisor.stop_service(&name).await.is_ok()),
        Request::Restart(name) => ok_failed(supervisor.restart_service(&name).await.is_ok()),
        Request::Status(name) => supervisor.status_text(&name).await,
        Request::List => supervisor.list_text().await,
        Request::Unknown => "Unknown command\n".to_string(),
    };

    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!(error = %e, "control write failed");
    }
    let _ = stream.shutdown().await;
}

fn ok_failed(ok: bool) -> String {
    if ok {
        "OK\n".to_string()
    } else {
        "FAILED\n".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_verbs() {
        assert_eq!(parse_request("start sshd"), Request::Start("sshd".into()));
        assert_eq!(parse_request("stop sshd\n"), Request::Stop("sshd".into()));
        assert_eq!(
            parse_request("restart network"),
            Request::Restart("network".into())
        );
        assert_eq!(parse_request("status a"), Request::Status("a".into()));
        assert_eq!(parse_request("list"), Request::List);
        assert_eq!(parse_request("list extra"), Request::List);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_request(""), Request::Unknown);
        assert_eq!(parse_request("  "), Request::Unknown);
        assert_eq!(parse_request("frobnicate sshd"), Request::Unknown);
        // Mutating verbs need a service name.
        assert_eq!(parse_request("start"), Request::Unknown);
        assert_eq!(parse_request("stop "), Request::Unknown);
    }
}
