//! TTY handling: device takeover, terminal discipline and the echoless
//! password read.

use crate::error::{Error, Result};
use nix::sys::termios::{tcgetattr, tcsetattr, InputFlags, LocalFlags, OutputFlags, SetArg};
use std::ffi::CString;
use std::io::{Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

const MAX_PASSWORD: usize = 512;

/// Take over a TTY device: close inherited stdio, open the device, start
/// a new session with the device as controlling terminal, dup it onto
/// fds 0/1/2 and restore canonical line discipline.
pub fn bind(device: &Path) -> Result<()> {
    let path = CString::new(device.as_os_str().as_bytes()).map_err(|_| Error::TtyBind {
        device: device.display().to_string(),
        reason: "NUL in path".to_string(),
    })?;

    unsafe {
        libc::close(0);
        libc::close(1);
        libc::close(2);
        let fd = libc::open(path.as_ptr(), libc::O_RDWR | libc::O_NOCTTY);
        if fd < 0 {
            return Err(Error::TtyBind {
                device: device.display().to_string(),
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        // setsid fails if we already lead a session (spawned by init
        // with its own setsid); the controlling-tty ioctl still applies.
        libc::setsid();
        libc::ioctl(fd, libc::TIOCSCTTY, 0);
        libc::dup2(fd, 0);
        libc::dup2(fd, 1);
        libc::dup2(fd, 2);
        if fd > 2 {
            libc::close(fd);
        }
    }

    canonical_mode()
}

/// Canonical line/echo mode on stdin.
fn canonical_mode() -> Result<()> {
    let stdin = std::io::stdin();
    let mut term = tcgetattr(&stdin)?;
    term.local_flags.insert(
        LocalFlags::ICANON
            | LocalFlags::ECHO
            | LocalFlags::ECHOE
            | LocalFlags::ECHOK
            | LocalFlags::ISIG,
    );
    term.input_flags.insert(InputFlags::ICRNL);
    term.output_flags.insert(OutputFlags::OPOST | OutputFlags::ONLCR);
    tcsetattr(&stdin, SetArg::TCSANOW, &term)?;
    Ok(())
}

/// Read a password with local echo off. Terminal attributes are saved
/// and restored; backspace shortens the buffer; bytes outside printable
/// ASCII are ignored.
pub fn read_password() -> Result<String> {
    let stdin = std::io::stdin();
    let saved = tcgetattr(&stdin)?;
    let mut quiet = saved.clone();
    quiet.local_flags.remove(
        LocalFlags::ECHO | LocalFlags::ECHOE | LocalFlags::ECHOK | LocalFlags::ECHONL,
    );
    tcsetattr(&stdin, SetArg::TCSAFLUSH, &quiet)?;

    let mut password = String::new();
    let mut byte = [0u8; 1];
    let mut handle = stdin.lock();
    loop {
        match handle.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                let c = byte[0];
                if c == b'\n' || c == b'\r' {
                    break;
                }
                if c == 0x7f || c == 0x08 {
                    password.pop();
                    continue;
                }
                if !(0x20..=0x7e).contains(&c) {
                    continue;
                }
                if password.len() < MAX_PASSWORD {
                    password.push(c as char);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tcsetattr(&stdin, SetArg::TCSAFLUSH, &saved);
                return Err(e.into());
            }
        }
    }
    drop(handle);

    tcsetattr(&stdin, SetArg::TCSAFLUSH, &saved)?;
    println!();
    let _ = std::io::stdout().flush();
    Ok(password)
}

/// The tty line name: the device path without its `/dev/` prefix.
pub fn tty_line(path: &str) -> &str {
    path.strip_prefix("/dev/").unwrap_or(path)
}

/// Line name of the current controlling terminal on fd 0.
pub fn current_tty_line() -> Option<String> {
    let target = std::fs::read_link("/proc/self/fd/0").ok()?;
    let s = target.to_str()?;
    if s.starts_with("/dev/") {
        Some(tty_line(s).to_string())
    } else {
        None
    }
}

/// Serial lines get TERM=vt100.
pub fn is_serial(line: &str) -> bool {
    line.starts_with("ttyS") || line.starts_with("ttyUSB")
}

/// Virtual consoles (tty0..tty63) get DISPLAY=:0.
pub fn is_virtual_console(line: &str) -> bool {
    line.strip_prefix("tty")
        .map(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_name_strips_dev_prefix() {
        assert_eq!(tty_line("/dev/tty1"), "tty1");
        assert_eq!(tty_line("/dev/ttyS0"), "ttyS0");
        assert_eq!(tty_line("ttyS0"), "ttyS0");
    }

    #[test]
    fn serial_classification() {
        assert!(is_serial("ttyS0"));
        assert!(is_serial("ttyUSB0"));
        assert!(!is_serial("tty1"));
        assert!(!is_serial("pts/0"));
    }

    #[test]
    fn virtual_console_classification() {
        assert!(is_virtual_console("tty1"));
        assert!(is_virtual_console("tty12"));
        assert!(!is_virtual_console("tty"));
        assert!(!is_virtual_console("ttyS0"));
        assert!(!is_virtual_console("pts/0"));
    }
}
