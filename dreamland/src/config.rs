//! Configuration: mirror list, TLS policy, install root and the
//! XDG-derived directory layout.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Raw URL of the Galactica source repository.
pub const GALACTICA_URL: &str =
    "https://raw.githubusercontent.com/LinkNavi/GalacticaRepository/main/";

fn default_mirrors() -> Vec<String> {
    vec![
        "https://mirror.rackspace.com/archlinux".to_string(),
        "https://mirrors.kernel.org/archlinux".to_string(),
        "https://geo.mirror.pkgbuild.com".to_string(),
    ]
}

fn default_repos() -> Vec<String> {
    vec!["core".to_string(), "extra".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_install_root() -> PathBuf {
    PathBuf::from("/")
}

fn default_galactica_url() -> String {
    GALACTICA_URL.to_string()
}

/// User-overridable settings, read from
/// `$XDG_CONFIG_HOME/dreamland/config.toml` when present.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Binary mirrors, tried in order
    #[serde(default = "default_mirrors")]
    pub mirrors: Vec<String>,
    /// Binary repository names fetched from each mirror
    #[serde(default = "default_repos")]
    pub repos: Vec<String>,
    /// TLS certificate verification for all fetches
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    /// Filesystem root that binary packages extract into
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,
    /// Base URL of the Galactica source repository
    #[serde(default = "default_galactica_url")]
    pub galactica_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mirrors: default_mirrors(),
            repos: default_repos(),
            verify_tls: true,
            install_root: default_install_root(),
            galactica_url: default_galactica_url(),
        }
    }
}

/// Full configuration: settings plus the on-disk layout.
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,

    /// Scratch state under the cache base
    pub cache_dir: PathBuf,
    pub build_dir: PathBuf,
    pub pkg_cache_dir: PathBuf,
    pub db_cache_dir: PathBuf,
    pub index_file: PathBuf,

    /// Durable state under the data base
    pub catalog_file: PathBuf,
    pub installed_file: PathBuf,
    pub manifest_dir: PathBuf,
    /// Module directories, system first; installs target the first
    /// writable one
    pub module_search_paths: Vec<PathBuf>,
    pub modules_dir: PathBuf,
}

impl Config {
    /// Resolve against the XDG base directories and load the optional
    /// config file.
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        let cache_base = std::env::var("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Path::new(&home).join(".cache"));
        let data_base = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Path::new(&home).join(".local/share"));
        let config_base = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Path::new(&home).join(".config"));

        let settings = Self::load_settings(&config_base.join("dreamland/config.toml"))?;
        Self::from_bases(settings, &cache_base, &data_base)
    }

    /// Build a configuration rooted at explicit base directories.
    pub fn from_bases(settings: Settings, cache_base: &Path, data_base: &Path) -> Result<Self> {
        let cache_dir = cache_base.join("dreamland");
        let data_dir = data_base.join("dreamland");

        let module_search_paths = vec![
            PathBuf::from("/usr/local/share/dreamland/modules"),
            data_dir.join("modules"),
        ];
        let modules_dir = module_search_paths
            .iter()
            .find(|p| is_writable_dir(p))
            .cloned()
            .unwrap_or_else(|| data_dir.join("modules"));

        let config = Self {
            settings,
            build_dir: cache_dir.join("build"),
            pkg_cache_dir: cache_dir.join("packages"),
            db_cache_dir: cache_dir.join("db"),
            index_file: cache_dir.join("package_index.txt"),
            catalog_file: data_dir.join("packages.db"),
            installed_file: data_dir.join("installed.db"),
            manifest_dir: data_dir.join("manifests"),
            module_search_paths,
            modules_dir,
            cache_dir,
        };
        config.ensure_dirs()?;
        Ok(config)
    }

    fn load_settings(path: &Path) -> Result<Settings> {
        if !path.exists() {
            return Ok(Settings::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.cache_dir,
            &self.build_dir,
            &self.pkg_cache_dir,
            &self.db_cache_dir,
            &self.manifest_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        if let Some(parent) = self.installed_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // The modules directory may be system-owned and unwritable.
        let _ = std::fs::create_dir_all(&self.modules_dir);
        Ok(())
    }
}

fn is_writable_dir(path: &Path) -> bool {
    path.is_dir()
        && nix_access_write(path)
}

fn nix_access_write(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    let Ok(c) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(c.as_ptr(), libc::W_OK) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults() {
        let s = Settings::default();
        assert_eq!(s.mirrors.len(), 3);
        assert_eq!(s.repos, vec!["core", "extra"]);
        assert!(s.verify_tls);
        assert_eq!(s.install_root, PathBuf::from("/"));
    }

    #[test]
    fn settings_from_toml_overrides() {
        let s: Settings = toml::from_str(
            r#"
mirrors = ["https://mirror.example.org/archlinux"]
verify_tls = false
install_root = "/mnt/target"
"#,
        )
        .unwrap();
        assert_eq!(s.mirrors.len(), 1);
        assert!(!s.verify_tls);
        assert_eq!(s.install_root, PathBuf::from("/mnt/target"));
        // Unset keys keep their defaults.
        assert_eq!(s.repos, vec!["core", "extra"]);
    }

    #[test]
    fn layout_under_bases() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::from_bases(
            Settings::default(),
            &tmp.path().join("cache"),
            &tmp.path().join("data"),
        )
        .unwrap();
        assert!(config.pkg_cache_dir.ends_with("dreamland/packages"));
        assert!(config.manifest_dir.is_dir());
        assert!(config.build_dir.is_dir());
    }
}
