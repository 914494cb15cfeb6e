//! The local package catalog and the installed registry.
//!
//! Both are flat files: the catalog is pipe-delimited with a source tag
//! per line, the installed registry is `name version source-tag`.

use crate::config::Config;
use crate::error::Result;
use crate::types::{InstalledPackage, Package, PackageSource};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// In-memory view of the catalog and the installed registry.
#[derive(Debug, Default)]
pub struct Catalog {
    pub packages: BTreeMap<String, Package>,
    pub installed: BTreeMap<String, InstalledPackage>,
}

impl Catalog {
    /// Load both stores, tolerating missing files (first run).
    pub fn load(config: &Config) -> Result<Self> {
        let mut catalog = Catalog::default();
        if config.catalog_file.exists() {
            let content = std::fs::read_to_string(&config.catalog_file)?;
            catalog.packages = parse_catalog(&content);
        }
        if config.installed_file.exists() {
            let content = std::fs::read_to_string(&config.installed_file)?;
            catalog.installed = parse_installed(&content);
        }
        debug!(
            packages = catalog.packages.len(),
            installed = catalog.installed.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    pub fn save_catalog(&self, config: &Config) -> Result<()> {
        write_atomically(&config.catalog_file, &serialize_catalog(&self.packages))
    }

    pub fn save_installed(&self, config: &Config) -> Result<()> {
        write_atomically(&config.installed_file, &serialize_installed(&self.installed))
    }

    /// Replace every entry of one source with a freshly synced set,
    /// leaving the other source's entries untouched.
    pub fn replace_source(&mut self, source: PackageSource, fresh: Vec<Package>) {
        self.packages.retain(|_, p| p.source != source);
        for pkg in fresh {
            // First definition wins across repos.
            self.packages.entry(pkg.name.clone()).or_insert(pkg);
        }
    }

    /// Map a `.so` dependency token to a package name: exact match first,
    /// then with a leading `lib` stripped. Non-library tokens and unknown
    /// libraries pass through unchanged.
    pub fn resolve_lib_token(&self, token: &str) -> String {
        let Some(so) = token.find(".so") else {
            return token.to_string();
        };
        let base = &token[..so];
        if self.packages.contains_key(base) {
            return base.to_string();
        }
        if let Some(without_lib) = base.strip_prefix("lib") {
            if self.packages.contains_key(without_lib) {
                return without_lib.to_string();
            }
        }
        debug!(token = token, "could not resolve library to a package");
        token.to_string()
    }
}

fn write_atomically(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Catalog line formats; the free-text description always comes last so
/// it may contain the delimiter.
///
/// `ARCH|name|version|repo|filename|size|deps_resolved|deps|description`
/// `GALACTICA|name|version|url|category|deps|description`
fn serialize_catalog(packages: &BTreeMap<String, Package>) -> String {
    let mut out = String::new();
    for pkg in packages.values() {
        match pkg.source {
            PackageSource::ArchBinary => {
                out.push_str(&format!(
                    "ARCH|{}|{}|{}|{}|{}|{}|{}|{}\n",
                    pkg.name,
                    pkg.version,
                    pkg.repo,
                    pkg.filename,
                    pkg.size,
                    if pkg.deps_resolved { "1" } else { "0" },
                    pkg.dependencies.join(" "),
                    pkg.description,
                ));
            }
            PackageSource::Galactica => {
                out.push_str(&format!(
                    "GALACTICA|{}|{}|{}|{}|{}|{}\n",
                    pkg.name,
                    pkg.version,
                    pkg.url,
                    pkg.category,
                    pkg.dependencies.join(" "),
                    pkg.description,
                ));
            }
            PackageSource::Module => {}
        }
    }
    out
}

fn parse_catalog(content: &str) -> BTreeMap<String, Package> {
    let mut packages = BTreeMap::new();
    for line in content.lines() {
        if line.is_empty() {
            continue;
        }
        let Some(pkg) = parse_catalog_line(line) else {
            debug!(line = line, "skipping malformed catalog line");
            continue;
        };
        packages.insert(pkg.name.clone(), pkg);
    }
    packages
}

fn parse_catalog_line(line: &str) -> Option<Package> {
    let (tag, rest) = line.split_once('|')?;
    match tag {
        "ARCH" => {
            let fields: Vec<&str> = rest.splitn(8, '|').collect();
            if fields.len() != 8 {
                return None;
            }
            let mut pkg = Package::new(fields[0], PackageSource::ArchBinary);
            pkg.version = fields[1].to_string();
            pkg.repo = fields[2].to_string();
            pkg.filename = fields[3].to_string();
            pkg.size = fields[4].parse().unwrap_or(0);
            pkg.deps_resolved = fields[5] == "1";
            pkg.dependencies = fields[6].split_whitespace().map(str::to_string).collect();
            pkg.description = fields[7].to_string();
            Some(pkg)
        }
        "GALACTICA" => {
            let fields: Vec<&str> = rest.splitn(6, '|').collect();
            if fields.len() != 6 {
                return None;
            }
            let mut pkg = Package::new(fields[0], PackageSource::Galactica);
            pkg.version = fields[1].to_string();
            pkg.url = fields[2].to_string();
            pkg.category = fields[3].to_string();
            pkg.dependencies = fields[4].split_whitespace().map(str::to_string).collect();
            pkg.description = fields[5].to_string();
            Some(pkg)
        }
        _ => None,
    }
}

fn serialize_installed(installed: &BTreeMap<String, InstalledPackage>) -> String {
    let mut out = String::new();
    for pkg in installed.values() {
        out.push_str(&format!("{} {} {}\n", pkg.name, pkg.version, pkg.source.tag()));
    }
    out
}

fn parse_installed(content: &str) -> BTreeMap<String, InstalledPackage> {
    let mut installed = BTreeMap::new();
    for line in content.lines() {
        let mut words = line.split_whitespace();
        let (Some(name), Some(version), Some(tag)) = (words.next(), words.next(), words.next())
        else {
            continue;
        };
        let Some(source) = PackageSource::from_tag(tag) else {
            continue;
        };
        installed.insert(
            name.to_string(),
            InstalledPackage {
                name: name.to_string(),
                version: version.to_string(),
                source,
            },
        );
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arch_pkg(name: &str) -> Package {
        let mut pkg = Package::new(name, PackageSource::ArchBinary);
        pkg.version = "1.0-1".to_string();
        pkg.repo = "core".to_string();
        pkg.filename = format!("{}-1.0-1-x86_64.pkg.tar.zst", name);
        pkg.size = 1024;
        pkg.dependencies = vec!["glibc".to_string()];
        pkg.description = "a test | package".to_string();
        pkg
    }

    #[test]
    fn catalog_round_trip() {
        let mut packages = BTreeMap::new();
        packages.insert("vim".to_string(), arch_pkg("vim"));
        let mut src = Package::new("hello", PackageSource::Galactica);
        src.version = "2.12".to_string();
        src.url = "https://ftp.gnu.org/gnu/hello/hello-2.12.tar.gz".to_string();
        src.category = "utils".to_string();
        src.dependencies = vec!["make".to_string()];
        src.description = "GNU hello".to_string();
        packages.insert("hello".to_string(), src);

        let parsed = parse_catalog(&serialize_catalog(&packages));
        assert_eq!(parsed.len(), 2);
        let vim = &parsed["vim"];
        assert_eq!(vim.source, PackageSource::ArchBinary);
        assert_eq!(vim.filename, "vim-1.0-1-x86_64.pkg.tar.zst");
        assert_eq!(vim.size, 1024);
        assert_eq!(vim.dependencies, vec!["glibc"]);
        // The description keeps its embedded delimiter.
        assert_eq!(vim.description, "a test | package");
        let hello = &parsed["hello"];
        assert_eq!(hello.source, PackageSource::Galactica);
        assert_eq!(hello.url, "https://ftp.gnu.org/gnu/hello/hello-2.12.tar.gz");
        assert_eq!(hello.dependencies, vec!["make"]);
    }

    #[test]
    fn installed_registry_round_trip() {
        let mut installed = BTreeMap::new();
        for (name, tag) in [
            ("vim", PackageSource::ArchBinary),
            ("hello", PackageSource::Galactica),
            ("workspace", PackageSource::Module),
        ] {
            installed.insert(
                name.to_string(),
                InstalledPackage {
                    name: name.to_string(),
                    version: "1.0".to_string(),
                    source: tag,
                },
            );
        }
        let parsed = parse_installed(&serialize_installed(&installed));
        assert_eq!(parsed, installed);
    }

    #[test]
    fn installed_registry_wire_format() {
        let mut installed = BTreeMap::new();
        installed.insert(
            "vim".to_string(),
            InstalledPackage {
                name: "vim".to_string(),
                version: "9.1".to_string(),
                source: PackageSource::ArchBinary,
            },
        );
        assert_eq!(serialize_installed(&installed), "vim 9.1 arch\n");
    }

    #[test]
    fn replace_source_keeps_other_entries() {
        let mut catalog = Catalog::default();
        catalog.packages.insert("vim".to_string(), arch_pkg("vim"));
        let mut src = Package::new("hello", PackageSource::Galactica);
        src.version = "1".to_string();
        catalog.packages.insert("hello".to_string(), src);

        catalog.replace_source(PackageSource::ArchBinary, vec![arch_pkg("nano")]);
        assert!(catalog.packages.contains_key("hello"));
        assert!(catalog.packages.contains_key("nano"));
        assert!(!catalog.packages.contains_key("vim"));
    }

    #[test]
    fn so_token_resolution() {
        let mut catalog = Catalog::default();
        catalog.packages.insert("curl".to_string(), arch_pkg("curl"));
        catalog.packages.insert("libxml2".to_string(), arch_pkg("libxml2"));

        // Exact match first.
        assert_eq!(catalog.resolve_lib_token("libxml2.so"), "libxml2");
        // Fallback strips the lib prefix.
        assert_eq!(catalog.resolve_lib_token("libcurl.so"), "curl");
        // Versioned .so suffixes resolve the same way.
        assert_eq!(catalog.resolve_lib_token("libcurl.so=4-64"), "curl");
        // Unknown libraries pass through.
        assert_eq!(catalog.resolve_lib_token("libfoo.so"), "libfoo.so");
        // Plain names pass through.
        assert_eq!(catalog.resolve_lib_token("ncurses"), "ncurses");
    }
}
