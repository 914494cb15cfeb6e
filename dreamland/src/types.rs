//! Core package types.

use std::collections::HashMap;

/// Which repository a package comes from, and which installer owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageSource {
    /// Built from source via the Galactica repository
    Galactica,
    /// Prebuilt binary from an Arch mirror
    ArchBinary,
    /// A loadable command module
    Module,
}

impl PackageSource {
    /// The source tag persisted in the installed registry.
    pub fn tag(&self) -> &'static str {
        match self {
            PackageSource::Galactica => "galactica",
            PackageSource::ArchBinary => "arch",
            PackageSource::Module => "module",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "galactica" => Some(PackageSource::Galactica),
            "arch" => Some(PackageSource::ArchBinary),
            "module" => Some(PackageSource::Module),
            _ => None,
        }
    }
}

/// A package known to the catalog.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub description: String,
    pub source: PackageSource,

    /// Source tarball / git URL (Galactica)
    pub url: String,
    /// Category in the source repository (Galactica)
    pub category: String,
    /// Binary repository this came from, e.g. "core" (Arch)
    pub repo: String,
    /// Mirror filename of the package archive (Arch)
    pub filename: String,
    /// Compressed download size in bytes (Arch)
    pub size: u64,

    /// Logical dependency tokens, possibly version-constrained
    pub dependencies: Vec<String>,
    /// Shell build script body (Galactica)
    pub build_script: String,
    /// Named build settings: configure_flags, make_flags, install_target,
    /// free-form exports
    pub build_flags: HashMap<String, String>,

    /// Has the authoritative dependency list been computed, or only the
    /// repo summary?
    pub deps_resolved: bool,
}

impl Package {
    pub fn new(name: impl Into<String>, source: PackageSource) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            description: String::new(),
            source,
            url: String::new(),
            category: String::new(),
            repo: String::new(),
            filename: String::new(),
            size: 0,
            dependencies: Vec::new(),
            build_script: String::new(),
            build_flags: HashMap::new(),
            deps_resolved: false,
        }
    }
}

/// An entry in the installed registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    pub source: PackageSource,
}

/// Strip a trailing version constraint (`>=`, `<=`, `=`, `<`, `>`) from a
/// dependency token, yielding the bare name.
pub fn strip_version_constraint(token: &str) -> &str {
    match token.find(['<', '>', '=']) {
        Some(pos) => &token[..pos],
        None => token,
    }
}

/// Human-readable size for install plans.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
