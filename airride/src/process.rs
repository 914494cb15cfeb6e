//! Process spawning and reaping.
//!
//! Children are detached into their own session; stdio is attached to a
//! TTY, the console, or a per-service log file before exec.

use crate::error::{Error, Result};
use crate::service::Service;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::ffi::CString;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, error};

/// Exit status of a reaped child.
#[derive(Debug, Clone)]
pub struct ExitStatus {
    pub pid: u32,
    /// Exit code if the child exited normally
    pub code: Option<i32>,
    /// Signal number if the child was killed by a signal
    pub signal: Option<i32>,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// How the child's stdio is wired up.
#[derive(Debug, Clone)]
pub enum StdioMode {
    /// Open the device O_RDWR|O_NOCTTY, make it the controlling terminal,
    /// dup onto fds 0/1/2.
    Tty { device: PathBuf, clear: bool },
    /// Same as `Tty` but on /dev/console.
    Console { clear: bool },
    /// stdin from /dev/null, stdout/stderr appended to a log file.
    Log { path: PathBuf },
}

impl StdioMode {
    /// Pick the stdio attachment for a service.
    pub fn for_service(svc: &Service, log_dir: &Path) -> StdioMode {
        if let Some(device) = &svc.tty_device {
            StdioMode::Tty {
                device: device.clone(),
                clear: svc.clear_screen,
            }
        } else if svc.foreground {
            StdioMode::Console {
                clear: svc.clear_screen,
            }
        } else {
            StdioMode::Log {
                path: log_dir.join(format!("{}.log", svc.name)),
            }
        }
    }
}

/// Spawn a service child process and return its pid.
pub fn spawn(svc: &Service, log_dir: &Path) -> Result<u32> {
    let argv: Vec<String> = svc.exec_start.split_whitespace().map(str::to_string).collect();
    if argv.is_empty() {
        return Err(Error::SpawnFailed(format!("{}: empty exec_start", svc.name)));
    }

    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);

    match StdioMode::for_service(svc, log_dir) {
        StdioMode::Tty { device, clear } => {
            attach_terminal(&mut cmd, &device, clear)?;
        }
        StdioMode::Console { clear } => {
            attach_terminal(&mut cmd, Path::new("/dev/console"), clear)?;
        }
        StdioMode::Log { path } => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let log = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::from(log.try_clone()?));
            cmd.stderr(Stdio::from(log));
            unsafe {
                cmd.pre_exec(|| {
                    libc::setsid();
                    Ok(())
                });
            }
        }
    }

    let child = cmd
        .spawn()
        .map_err(|e| Error::SpawnFailed(format!("{}: {}", svc.exec_start, e)))?;
    let pid = child.id();
    debug!(service = %svc.name, pid = pid, "spawned process");
    // The child is reaped through waitpid, not through the handle.
    drop(child);
    Ok(pid)
}

/// Wire the command to a terminal device: new session, device as the
/// controlling TTY, fds 0/1/2 duped onto it.
fn attach_terminal(cmd: &mut Command, device: &Path, clear: bool) -> Result<()> {
    let path = CString::new(device.as_os_str().as_encoded_bytes())
        .map_err(|_| Error::SpawnFailed(format!("{}: NUL in tty path", device.display())))?;
    unsafe {
        cmd.pre_exec(move || {
            libc::setsid();
            let fd = libc::open(path.as_ptr(), libc::O_RDWR | libc::O_NOCTTY);
            if fd < 0 {
                return Err(std::io::Error::last_os_error());
            }
            libc::ioctl(fd, libc::TIOCSCTTY, 0);
            if clear {
                let seq = b"\x1b[2J\x1b[H";
                libc::write(fd, seq.as_ptr() as *const libc::c_void, seq.len());
            }
            libc::dup2(fd, 0);
            libc::dup2(fd, 1);
            libc::dup2(fd, 2);
            if fd > 2 {
                libc::close(fd);
            }
            Ok(())
        });
    }
    Ok(())
}

/// Send a signal to a pid.
pub fn send_signal(pid: u32, sig: Signal) -> Result<()> {
    kill(Pid::from_raw(pid as i32), sig)?;
    Ok(())
}

/// Non-blocking check for a specific child's exit.
pub fn try_wait(pid: u32) -> Result<Option<ExitStatus>> {
    match waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::Exited(_, code)) => Ok(Some(ExitStatus {
            pid,
            code: Some(code),
            signal: None,
        })),
        Ok(WaitStatus::Signaled(_, sig, _)) => Ok(Some(ExitStatus {
            pid,
            code: None,
            signal: Some(sig as i32),
        })),
        Ok(WaitStatus::StillAlive) => Ok(None),
        Ok(_) => Ok(None),
        // Already reaped elsewhere or not our child.
        Err(nix::Error::ECHILD) => Ok(Some(ExitStatus {
            pid,
            code: None,
            signal: None,
        })),
        Err(e) => Err(e.into()),
    }
}

/// Drain every zombie without blocking.
pub fn reap_zombies() -> Vec<ExitStatus> {
    let mut statuses = Vec::new();
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => {
                let pid = pid.as_raw() as u32;
                debug!(pid = pid, code = code, "reaped child");
                statuses.push(ExitStatus {
                    pid,
                    code: Some(code),
                    signal: None,
                });
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                let pid = pid.as_raw() as u32;
                debug!(pid = pid, signal = ?sig, "reaped signaled child");
                statuses.push(ExitStatus {
                    pid,
                    code: None,
                    signal: Some(sig as i32),
                });
            }
            Ok(WaitStatus::StillAlive) | Err(nix::Error::ECHILD) => break,
            Ok(_) => continue,
            Err(e) => {
                error!(error = %e, "error reaping children");
                break;
            }
        }
    }
    statuses
}
