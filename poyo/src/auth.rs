//! Shadow-database authentication.
//!
//! Every failure path sleeps the same fixed delay before returning, and
//! every outcome is logged to syslog with the auth facility.

use std::path::Path;
use std::time::Duration;
use syslog::{Facility, Formatter3164, Logger, LoggerBackend};

const FAIL_DELAY: Duration = Duration::from_secs(3);
pub const SHADOW_FILE: &str = "/etc/shadow";

/// Syslog sink for authentication events. Absence of a syslog daemon is
/// tolerated; auth events are then dropped rather than written to the
/// user's terminal.
pub struct AuthLog {
    inner: Option<Logger<LoggerBackend, Formatter3164>>,
}

impl AuthLog {
    pub fn open() -> Self {
        let formatter = Formatter3164 {
            facility: Facility::LOG_AUTH,
            hostname: None,
            process: "poyo".to_string(),
            pid: 0,
        };
        Self {
            inner: syslog::unix(formatter).ok(),
        }
    }

    pub fn info(&mut self, message: String) {
        if let Some(logger) = &mut self.inner {
            let _ = logger.info(message);
        }
    }

    pub fn warning(&mut self, message: String) {
        if let Some(logger) = &mut self.inner {
            let _ = logger.warning(message);
        }
    }

    pub fn err(&mut self, message: String) {
        if let Some(logger) = &mut self.inner {
            let _ = logger.err(message);
        }
    }
}

/// One entry of the shadow database: the login name and its password
/// hash field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowEntry {
    pub name: String,
    pub hash: String,
}

/// Classification of a shadow hash field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashClass {
    /// `*` - account disabled
    Disabled,
    /// `!!` - password never set
    NeverSet,
    /// `!` - locked
    Locked,
    /// empty field - password-free account
    Empty,
    /// a crypt(3) hash
    Crypt,
}

pub fn classify(hash: &str) -> HashClass {
    if hash.is_empty() {
        HashClass::Empty
    } else if hash.starts_with('*') {
        HashClass::Disabled
    } else if hash.starts_with("!!") {
        HashClass::NeverSet
    } else if hash.starts_with('!') {
        HashClass::Locked
    } else {
        HashClass::Crypt
    }
}

/// Username policy: 1-32 characters, first `[A-Za-z_]`, rest
/// `[A-Za-z0-9_-]`.
pub fn valid_username(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 32 {
        return false;
    }
    let first_ok = bytes[0].is_ascii_alphabetic() || bytes[0] == b'_';
    first_ok
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-')
}

/// Find a user's shadow entry.
pub fn lookup_shadow(path: &Path, user: &str) -> std::io::Result<Option<ShadowEntry>> {
    let content = std::fs::read_to_string(path)?;
    for line in content.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.splitn(3, ':');
        let (Some(name), Some(hash)) = (fields.next(), fields.next()) else {
            continue;
        };
        if name == user {
            return Ok(Some(ShadowEntry {
                name: name.to_string(),
                hash: hash.to_string(),
            }));
        }
    }
    Ok(None)
}

/// Hash the supplied plaintext under the stored salt/scheme and compare
/// in constant time.
pub fn verify_password(password: &str, stored: &str) -> bool {
    match pwhash::unix::crypt(password, stored) {
        Ok(computed) => constant_time_eq(computed.as_bytes(), stored.as_bytes()),
        Err(_) => false,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Overwrite a secret with zeros before the buffer is released.
pub fn wipe(secret: &mut String) {
    unsafe {
        for byte in secret.as_bytes_mut() {
            std::ptr::write_volatile(byte, 0);
        }
    }
    std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
    secret.clear();
}

/// Authenticate a user against the shadow database.
pub fn authenticate(username: &str, password: &str, tty: &str, log: &mut AuthLog) -> bool {
    authenticate_against(Path::new(SHADOW_FILE), username, password, tty, log)
}

fn authenticate_against(
    shadow: &Path,
    username: &str,
    password: &str,
    tty: &str,
    log: &mut AuthLog,
) -> bool {
    let entry = match lookup_shadow(shadow, username) {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            log.warning(format!("user not found: {} on {}", username, tty));
            fail_delay();
            return false;
        }
        Err(e) => {
            log.err(format!("cannot read shadow database: {}", e));
            fail_delay();
            return false;
        }
    };

    match classify(&entry.hash) {
        HashClass::Disabled => {
            log.warning(format!("account disabled: {} on {}", username, tty));
            fail_delay();
            false
        }
        HashClass::NeverSet => {
            log.warning(format!("password never set: {} on {}", username, tty));
            fail_delay();
            false
        }
        HashClass::Locked => {
            log.warning(format!("account locked: {} on {}", username, tty));
            fail_delay();
            false
        }
        // Documented policy: an empty hash field admits any password.
        HashClass::Empty => {
            log.warning(format!("empty password login: {} on {}", username, tty));
            true
        }
        HashClass::Crypt => {
            if verify_password(password, &entry.hash) {
                log.info(format!("successful login: {} on {}", username, tty));
                true
            } else {
                log.warning(format!("failed login attempt: {} on {}", username, tty));
                fail_delay();
                false
            }
        }
    }
}

fn fail_delay() {
    std::thread::sleep(FAIL_DELAY);
}
