//! PID 1 duties: virtual filesystem mounts, /dev node creation and the
//! hostname. Every failure here is logged and non-fatal.

use nix::mount::{mount, MsFlags};
use nix::sys::stat::{makedev, mknod, Mode, SFlag};
use std::path::Path;
use tracing::{info, warn};

struct MountSpec {
    source: &'static str,
    target: &'static str,
    fstype: &'static str,
    flags: MsFlags,
    data: Option<&'static str>,
}

const MOUNTS: &[MountSpec] = &[
    MountSpec {
        source: "proc",
        target: "/proc",
        fstype: "proc",
        flags: MsFlags::MS_NOEXEC.union(MsFlags::MS_NOSUID).union(MsFlags::MS_NODEV),
        data: None,
    },
    MountSpec {
        source: "sysfs",
        target: "/sys",
        fstype: "sysfs",
        flags: MsFlags::MS_NOEXEC.union(MsFlags::MS_NOSUID).union(MsFlags::MS_NODEV),
        data: None,
    },
    MountSpec {
        source: "devtmpfs",
        target: "/dev",
        fstype: "devtmpfs",
        flags: MsFlags::MS_NOSUID,
        data: Some("mode=0755"),
    },
    MountSpec {
        source: "devpts",
        target: "/dev/pts",
        fstype: "devpts",
        flags: MsFlags::MS_NOEXEC.union(MsFlags::MS_NOSUID),
        data: Some("gid=5,mode=620"),
    },
    MountSpec {
        source: "tmpfs",
        target: "/run",
        fstype: "tmpfs",
        flags: MsFlags::MS_NOEXEC.union(MsFlags::MS_NOSUID).union(MsFlags::MS_NODEV),
        data: Some("mode=0755"),
    },
    MountSpec {
        source: "tmpfs",
        target: "/tmp",
        fstype: "tmpfs",
        flags: MsFlags::MS_NOEXEC.union(MsFlags::MS_NOSUID).union(MsFlags::MS_NODEV),
        data: Some("mode=1777"),
    },
];

/// Mount the standard virtual filesystems.
pub fn mount_filesystems() {
    info!("mounting virtual filesystems");
    for spec in MOUNTS {
        if let Err(e) = std::fs::create_dir_all(spec.target) {
            warn!(target = spec.target, error = %e, "failed to create mount point");
            continue;
        }
        match mount(
            Some(spec.source),
            spec.target,
            Some(spec.fstype),
            spec.flags,
            spec.data,
        ) {
            Ok(()) => info!(target = spec.target, fstype = spec.fstype, "mounted"),
            Err(e) => warn!(target = spec.target, error = %e, "mount failed"),
        }
    }
}

/// Character devices created under /dev: (path, major, minor, mode).
const DEVICE_NODES: &[(&str, u64, u64, u32)] = &[
    ("/dev/console", 5, 1, 0o600),
    ("/dev/null", 1, 3, 0o666),
    ("/dev/zero", 1, 5, 0o666),
    ("/dev/random", 1, 8, 0o666),
    ("/dev/urandom", 1, 9, 0o666),
    ("/dev/tty", 5, 0, 0o666),
    ("/dev/tty0", 4, 0, 0o620),
    ("/dev/tty1", 4, 1, 0o620),
    ("/dev/tty2", 4, 2, 0o620),
    ("/dev/tty3", 4, 3, 0o620),
    ("/dev/ttyS0", 4, 64, 0o660),
    ("/dev/fb0", 29, 0, 0o660),
    ("/dev/dri/card0", 226, 0, 0o660),
    ("/dev/dri/renderD128", 226, 128, 0o660),
];

/// Create the standard character device nodes. devtmpfs usually provides
/// these already; EEXIST is expected and silent.
pub fn create_device_nodes() {
    for (path, major, minor, mode) in DEVICE_NODES {
        let path = Path::new(path);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match mknod(
            path,
            SFlag::S_IFCHR,
            Mode::from_bits_truncate(*mode),
            makedev(*major, *minor),
        ) {
            Ok(()) => info!(device = %path.display(), "created device node"),
            Err(nix::Error::EEXIST) => {}
            Err(e) => warn!(device = %path.display(), error = %e, "mknod failed"),
        }
    }
}

/// Apply /etc/hostname, defaulting to "galactica".
pub fn apply_hostname() {
    let hostname = std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "galactica".to_string());
    match nix::unistd::sethostname(&hostname) {
        Ok(()) => info!(hostname = %hostname, "hostname applied"),
        Err(e) => warn!(hostname = %hostname, error = %e, "failed to set hostname"),
    }
}
