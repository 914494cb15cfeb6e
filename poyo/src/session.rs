//! Session establishment after successful authentication: environment
//! sanitization, utmp/wtmp accounting, privilege drop and the login
//! shell exec.

use crate::error::{Error, Result};
use crate::tty;
use nix::unistd::{Gid, Uid};
use std::ffi::CString;
use std::io::Write;
use std::path::{Path, PathBuf};

const WTMP_FILE: &str = "/var/log/wtmp";
const ROOT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const USER_PATH: &str = "/usr/local/bin:/usr/bin:/bin:/usr/local/sbin:/usr/sbin:/sbin";

/// Target identity for the session.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: PathBuf,
}

/// Look up the passwd entry for a user.
pub fn lookup_user(name: &str) -> Result<Option<UserInfo>> {
    let Some(user) = nix::unistd::User::from_name(name)? else {
        return Ok(None);
    };
    Ok(Some(UserInfo {
        name: user.name,
        uid: user.uid.as_raw(),
        gid: user.gid.as_raw(),
        home: user.dir,
        shell: user.shell,
    }))
}

/// The sanitized session environment, built from nothing.
pub fn build_environment(user: &UserInfo, tty_line: &str) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = vec![
        ("HOME".into(), user.home.display().to_string()),
        ("USER".into(), user.name.clone()),
        ("LOGNAME".into(), user.name.clone()),
        ("SHELL".into(), user.shell.display().to_string()),
        (
            "PATH".into(),
            if user.uid == 0 { ROOT_PATH } else { USER_PATH }.to_string(),
        ),
        (
            "TERM".into(),
            if tty::is_serial(tty_line) { "vt100" } else { "linux" }.to_string(),
        ),
        ("PS1".into(), "[\\u@\\h \\W]\\$ ".to_string()),
    ];
    if tty::is_virtual_console(tty_line) {
        env.push(("DISPLAY".into(), ":0".to_string()));
    }
    env
}

/// Clear the inherited environment, then apply the session variables.
pub fn apply_environment(vars: &[(String, String)]) {
    let inherited: Vec<String> = std::env::vars().map(|(k, _)| k).collect();
    for key in inherited {
        std::env::remove_var(key);
    }
    for (key, value) in vars {
        std::env::set_var(key, value);
    }
}

/// Record the session in utmp and append the same record to wtmp.
pub fn record_session(user: &str, line: &str) {
    let mut ut: libc::utmpx = unsafe { std::mem::zeroed() };
    ut.ut_type = libc::USER_PROCESS;
    ut.ut_pid = std::process::id() as libc::pid_t;
    copy_into(&mut ut.ut_line, tty::tty_line(line));
    copy_into(&mut ut.ut_user, user);
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    ut.ut_tv.tv_sec = now.as_secs() as _;
    ut.ut_tv.tv_usec = 0;

    unsafe {
        libc::setutxent();
        libc::pututxline(&ut);
        libc::endutxent();
    }
    append_wtmp(&ut);
}

fn copy_into(dst: &mut [libc::c_char], src: &str) {
    let cap = dst.len().saturating_sub(1);
    for (slot, byte) in dst.iter_mut().zip(src.bytes().take(cap)) {
        *slot = byte as libc::c_char;
    }
}

fn append_wtmp(ut: &libc::utmpx) {
    let bytes = unsafe {
        std::slice::from_raw_parts(
            ut as *const libc::utmpx as *const u8,
            std::mem::size_of::<libc::utmpx>(),
        )
    };
    if let Ok(mut wtmp) = std::fs::OpenOptions::new().append(true).open(WTMP_FILE) {
        let _ = wtmp.write_all(bytes);
    }
}

/// Drop to the target identity. The readback check is mandatory: any
/// mismatch aborts the login.
pub fn drop_privileges(user: &UserInfo) -> Result<()> {
    let name = CString::new(user.name.as_str())
        .map_err(|_| Error::UnknownUser(user.name.clone()))?;
    let uid = Uid::from_raw(user.uid);
    let gid = Gid::from_raw(user.gid);

    nix::unistd::initgroups(&name, gid)?;
    nix::unistd::setgid(gid)?;
    nix::unistd::setuid(uid)?;

    if nix::unistd::getuid() != uid
        || nix::unistd::geteuid() != uid
        || nix::unistd::getgid() != gid
        || nix::unistd::getegid() != gid
    {
        return Err(Error::PrivilegeDrop(user.name.clone()));
    }
    Ok(())
}

/// argv[0] for a login shell: `-` plus the shell's basename.
pub fn login_shell_argv0(shell: &Path) -> String {
    let base = shell
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("sh");
    format!("-{}", base)
}

fn show_motd() {
    if let Ok(motd) = std::fs::read_to_string("/etc/motd") {
        print!("{}", motd);
        let _ = std::io::stdout().flush();
    }
}

/// chdir home, drop privileges, show /etc/motd and exec the login
/// shell. Does not return on success.
pub fn launch(user: &UserInfo) -> Result<std::convert::Infallible> {
    if nix::unistd::chdir(&user.home).is_err() {
        eprintln!("Warning: could not change to home directory {}", user.home.display());
        nix::unistd::chdir("/")?;
    }

    drop_privileges(user)?;
    show_motd();

    let shell = if user.shell.as_os_str().is_empty() {
        PathBuf::from("/bin/sh")
    } else {
        user.shell.clone()
    };
    let shell_c = CString::new(shell.display().to_string()).map_err(|_| Error::ShellExec {
        shell: shell.display().to_string(),
        reason: "NUL in shell path".to_string(),
    })?;
    let argv0 = CString::new(login_shell_argv0(&shell)).map_err(|_| Error::ShellExec {
        shell: shell.display().to_string(),
        reason: "NUL in shell name".to_string(),
    })?;

    nix::unistd::execv(&shell_c, &[argv0.as_c_str()]).map_err(|e| Error::ShellExec {
        shell: shell.display().to_string(),
        reason: e.to_string(),
    })
}
