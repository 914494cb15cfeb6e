//! Repository sync: the Galactica source index and the Arch binary
//! mirror databases feed the local catalog.

use crate::archive;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::types::{strip_version_constraint, Package, PackageSource};
use std::path::Path;
use tracing::{debug, info, warn};

/// Outcome of a sync pass.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub galactica_packages: usize,
    pub arch_packages: usize,
    pub mirror: Option<String>,
}

/// Sync both sources. Each source's catalog entries are replaced only
/// after it fetched and parsed successfully, so a failed sync leaves the
/// prior catalog intact.
pub fn sync(config: &Config, fetcher: &Fetcher, catalog: &mut Catalog) -> Result<SyncSummary> {
    let mut summary = SyncSummary::default();

    match sync_galactica(config, fetcher) {
        Ok(packages) => {
            summary.galactica_packages = packages.len();
            catalog.replace_source(PackageSource::Galactica, packages);
        }
        Err(e) => warn!(error = %e, "galactica sync failed, keeping previous entries"),
    }

    let (packages, mirror) = sync_arch(config, fetcher)?;
    summary.arch_packages = packages.len();
    summary.mirror = Some(mirror);
    catalog.replace_source(PackageSource::ArchBinary, packages);

    catalog.save_catalog(config)?;
    Ok(summary)
}

/// Fetch the Galactica INDEX and every descriptor it lists.
fn sync_galactica(config: &Config, fetcher: &Fetcher) -> Result<Vec<Package>> {
    info!("fetching Galactica index");
    let base = &config.settings.galactica_url;
    let index = fetcher.get_string(&format!("{}INDEX", base))?;
    std::fs::write(&config.index_file, &index)?;

    let mut packages = Vec::new();
    for line in index.lines() {
        let path = line.trim();
        if path.is_empty() || path.starts_with('#') {
            continue;
        }
        match fetcher.get_string(&format!("{}{}", base, path)) {
            Ok(content) => match parse_descriptor(&content) {
                Some(pkg) => {
                    debug!(package = %pkg.name, "loaded galactica descriptor");
                    packages.push(pkg);
                }
                None => debug!(path = path, "descriptor missing name or version"),
            },
            Err(e) => debug!(path = path, error = %e, "failed to fetch descriptor"),
        }
    }
    info!(count = packages.len(), "galactica packages");
    Ok(packages)
}

/// Parse a Galactica package descriptor.
///
/// INI-like sections: `[Package]`, `[Dependencies]`, `[Build]` and
/// `[Script]`. Inside `[Script]` whole lines are script content; equal
/// signs are not key/value separators there.
pub fn parse_descriptor(content: &str) -> Option<Package> {
    let mut pkg = Package::new("", PackageSource::Galactica);
    let mut section = String::new();

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].to_string();
            continue;
        }
        if section == "Script" {
            if !pkg.build_script.is_empty() {
                pkg.build_script.push('\n');
            }
            pkg.build_script.push_str(line);
            continue;
        }

        let Some(eq) = line.find('=') else { continue };
        let key = line[..eq].trim();
        let mut value = line[eq + 1..].trim();
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = &value[1..value.len() - 1];
        }

        match section.as_str() {
            "Package" => match key {
                "name" => pkg.name = value.to_string(),
                "version" => pkg.version = value.to_string(),
                "description" => pkg.description = value.to_string(),
                "url" => pkg.url = value.to_string(),
                "category" => pkg.category = value.to_string(),
                _ => {}
            },
            "Dependencies" => {
                if key == "depends" {
                    pkg.dependencies = value.split_whitespace().map(str::to_string).collect();
                }
            }
            "Build" => {
                pkg.build_flags.insert(key.to_string(), value.to_string());
            }
            _ => {}
        }
    }

    if pkg.name.is_empty() || pkg.version.is_empty() {
        return None;
    }
    Some(pkg)
}

/// Sync the binary databases, trying mirrors in order. A mirror counts
/// only if every configured repo fetched and parsed.
fn sync_arch(config: &Config, fetcher: &Fetcher) -> Result<(Vec<Package>, String)> {
    info!("syncing binary databases");
    for mirror in &config.settings.mirrors {
        match sync_arch_from(config, fetcher, mirror) {
            Ok(packages) => {
                info!(mirror = %mirror, count = packages.len(), "synced binary repositories");
                return Ok((packages, mirror.clone()));
            }
            Err(e) => {
                warn!(mirror = %mirror, error = %e, "mirror failed, trying next");
            }
        }
    }
    Err(Error::SyncFailed)
}

fn sync_arch_from(config: &Config, fetcher: &Fetcher, mirror: &str) -> Result<Vec<Package>> {
    let mut packages: Vec<Package> = Vec::new();
    for repo in &config.settings.repos {
        let url = format!("{}/{}/os/x86_64/{}.db", mirror, repo, repo);
        let db_file = config.db_cache_dir.join(format!("{}.db", repo));
        // Databases must be fresh; only package payloads are cache-reused.
        let _ = std::fs::remove_file(&db_file);
        fetcher.get_file(&url, &db_file)?;

        let repo_dir = config.db_cache_dir.join(repo);
        if repo_dir.exists() {
            std::fs::remove_dir_all(&repo_dir)?;
        }
        archive::extract_all(&db_file, &repo_dir)?;

        let parsed = parse_repo_dir(&repo_dir, repo)?;
        if parsed.is_empty() {
            return Err(Error::Archive {
                path: db_file.display().to_string(),
                message: format!("{} database yielded no packages", repo),
            });
        }
        info!(repo = repo, count = parsed.len(), "parsed repository database");
        packages.extend(parsed);
    }
    Ok(packages)
}

/// Walk an extracted repo database: one directory per package holding a
/// `desc` file and optionally a `depends` file.
fn parse_repo_dir(dir: &Path, repo: &str) -> Result<Vec<Package>> {
    let mut packages = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let desc_path = entry.path().join("desc");
        if !desc_path.exists() {
            continue;
        }
        let desc = std::fs::read_to_string(&desc_path)?;
        let Some(mut pkg) = parse_desc(&desc, repo) else {
            continue;
        };
        let depends_path = entry.path().join("depends");
        if depends_path.exists() {
            let depends = std::fs::read_to_string(&depends_path)?;
            pkg.dependencies = parse_depends(&depends);
        }
        packages.push(pkg);
    }
    Ok(packages)
}

/// Parse a repo `desc` file (`%SECTION%` headers, one value per line).
pub fn parse_desc(content: &str, repo: &str) -> Option<Package> {
    let mut pkg = Package::new("", PackageSource::ArchBinary);
    pkg.repo = repo.to_string();
    let mut section = String::new();

    for line in content.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if line.len() >= 2 && line.starts_with('%') && line.ends_with('%') {
            section = line[1..line.len() - 1].to_string();
            continue;
        }
        match section.as_str() {
            "NAME" => pkg.name = line.to_string(),
            "VERSION" => pkg.version = line.to_string(),
            "DESC" if pkg.description.is_empty() => pkg.description = line.to_string(),
            "FILENAME" => pkg.filename = line.to_string(),
            "CSIZE" => pkg.size = line.parse().unwrap_or(0),
            _ => {}
        }
    }

    if pkg.name.is_empty() {
        return None;
    }
    Some(pkg)
}

/// Parse a repo `depends` file, stripping version constraints.
pub fn parse_depends(content: &str) -> Vec<String> {
    let mut deps = Vec::new();
    let mut section = String::new();
    for line in content.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if line.len() >= 2 && line.starts_with('%') && line.ends_with('%') {
            section = line[1..line.len() - 1].to_string();
            continue;
        }
        if section == "DEPENDS" {
            deps.push(strip_version_constraint(line).to_string());
        }
    }
    deps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_full() {
        let content = r#"
# hello descriptor
[Package]
name = hello
version = 2.12
description = "GNU hello"
url = https://ftp.gnu.org/gnu/hello/hello-2.12.tar.gz
category = utils

[Dependencies]
depends = make gcc

[Build]
configure_flags = --prefix=/usr --disable-nls
make_flags = -j4

[Script]
./configure --prefix=/usr
make PREFIX=/usr install
"#;
        let pkg = parse_descriptor(content).unwrap();
        assert_eq!(pkg.name, "hello");
        assert_eq!(pkg.version, "2.12");
        assert_eq!(pkg.description, "GNU hello");
        assert_eq!(pkg.category, "utils");
        assert_eq!(pkg.dependencies, vec!["make", "gcc"]);
        assert_eq!(
            pkg.build_flags.get("configure_flags").map(String::as_str),
            Some("--prefix=/usr --disable-nls")
        );
        // Equal signs inside [Script] are not parsed as key=value.
        assert_eq!(
            pkg.build_script,
            "./configure --prefix=/usr\nmake PREFIX=/usr install"
        );
    }

    #[test]
    fn descriptor_requires_name_and_version() {
        assert!(parse_descriptor("[Package]\nname = x\n").is_none());
        assert!(parse_descriptor("[Package]\nversion = 1\n").is_none());
        assert!(parse_descriptor("[Package]\nname = x\nversion = 1\n").is_some());
    }

    #[test]
    fn desc_file_fields() {
        let content = "\
%NAME%
vim

%VERSION%
9.1.0000-1

%DESC%
Vi Improved

%FILENAME%
vim-9.1.0000-1-x86_64.pkg.tar.zst

%CSIZE%
1234567
";
        let pkg = parse_desc(content, "extra").unwrap();
        assert_eq!(pkg.name, "vim");
        assert_eq!(pkg.version, "9.1.0000-1");
        assert_eq!(pkg.description, "Vi Improved");
        assert_eq!(pkg.filename, "vim-9.1.0000-1-x86_64.pkg.tar.zst");
        assert_eq!(pkg.size, 1234567);
        assert_eq!(pkg.repo, "extra");
    }

    #[test]
    fn depends_file_strips_constraints() {
        let content = "\
%DEPENDS%
glibc>=2.39
ncurses
libgcrypt=1.10

%OPTDEPENDS%
python: for plugins
";
        assert_eq!(parse_depends(content), vec!["glibc", "ncurses", "libgcrypt"]);
    }
}
