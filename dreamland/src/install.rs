//! Package installation: binary extraction with manifest capture, and
//! source builds with build-system detection.

use crate::archive;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::resolver::Resolver;
use crate::types::{format_size, InstalledPackage, Package, PackageSource};
use crate::ui;
use console::style;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Install options.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Skip the confirmation prompt
    pub assume_yes: bool,
    /// Install the binary package even for source-sourced names
    pub force_binary: bool,
}

pub struct Installer<'a> {
    config: &'a Config,
    fetcher: &'a Fetcher,
    catalog: &'a mut Catalog,
}

impl<'a> Installer<'a> {
    pub fn new(config: &'a Config, fetcher: &'a Fetcher, catalog: &'a mut Catalog) -> Self {
        Self {
            config,
            fetcher,
            catalog,
        }
    }

    /// Install a package and its missing dependencies in resolved order.
    /// A second install of the same name is a warning and a no-op.
    pub fn install(&mut self, name: &str, opts: InstallOptions) -> Result<()> {
        if self.catalog.installed.contains_key(name) {
            ui::warn(&format!("{} already installed", name));
            return Ok(());
        }

        let root = self
            .catalog
            .packages
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PackageNotFound(name.to_string()))?;
        if opts.force_binary
            && root.source == PackageSource::Galactica
            && root.filename.is_empty()
        {
            return Err(Error::PackageNotFound(format!(
                "{} has no binary package",
                name
            )));
        }

        ui::status(&format!("Resolving dependencies for {}...", name));
        let resolution = Resolver::new(self.catalog, self.fetcher, self.config).resolve(name)?;
        // Resolution may have refined dependency lists; keep them.
        self.catalog.save_catalog(self.config)?;

        if resolution.order.is_empty() {
            ui::ok("nothing to do");
            return Ok(());
        }

        println!(
            "\n{}",
            style(format!("Packages to install ({}):", resolution.order.len())).cyan()
        );
        for pkg_name in &resolution.order {
            if let Some(pkg) = self.catalog.packages.get(pkg_name) {
                println!("  {} {}", pkg_name, style(&pkg.version).yellow());
            }
        }
        println!(
            "\n{} {}",
            style("Total download size:").cyan(),
            format_size(resolution.download_size)
        );

        if !opts.assume_yes {
            let proceed = dialoguer::Confirm::new()
                .with_prompt("Proceed with installation?")
                .default(true)
                .interact()?;
            if !proceed {
                println!("Installation cancelled.");
                return Err(Error::Cancelled);
            }
        }

        for pkg_name in &resolution.order {
            let pkg = self
                .catalog
                .packages
                .get(pkg_name)
                .cloned()
                .ok_or_else(|| Error::PackageNotFound(pkg_name.clone()))?;
            match pkg.source {
                PackageSource::ArchBinary => self.install_binary(&pkg)?,
                PackageSource::Galactica => self.install_source(&pkg)?,
                PackageSource::Module => {
                    debug!(package = %pkg_name, "module packages are not installed here")
                }
            }
        }

        ui::ok(&format!(
            "Successfully installed {} with {} package(s)",
            name,
            resolution.order.len()
        ));
        Ok(())
    }

    /// Download (or reuse) the package archive, extract it under the
    /// install root recording a manifest, and register it.
    fn install_binary(&mut self, pkg: &Package) -> Result<()> {
        println!("Installing: {} {}", style(&pkg.name).magenta(), pkg.version);

        let cached = self.config.pkg_cache_dir.join(&pkg.filename);
        if !cached.exists() {
            ui::status("Downloading...");
            for mirror in &self.config.settings.mirrors {
                let url = format!("{}/{}/os/x86_64/{}", mirror, pkg.repo, pkg.filename);
                if self.fetcher.get_file(&url, &cached).is_ok() {
                    break;
                }
            }
            if !cached.exists() {
                return Err(Error::DownloadFailed {
                    url: pkg.filename.clone(),
                    message: "no mirror served the package".to_string(),
                });
            }
        }

        let manifest =
            archive::extract_with_manifest(&cached, &self.config.settings.install_root)?;
        let manifest_path = self.config.manifest_dir.join(format!("{}.manifest", pkg.name));
        std::fs::write(&manifest_path, manifest.join("\n") + "\n")?;
        info!(package = %pkg.name, files = manifest.len(), "extracted");

        self.register_installed(pkg, PackageSource::ArchBinary)?;
        ui::ok(&format!("Installed {}", pkg.name));
        Ok(())
    }

    /// Fetch sources into a clean build directory, run the build script
    /// or a detected build system, and register the package. Source
    /// builds own their installed paths; no manifest is kept.
    fn install_source(&mut self, pkg: &Package) -> Result<()> {
        println!(
            "Installing from source: {} {}",
            style(&pkg.name).magenta(),
            pkg.version
        );

        let build_path = self.config.build_dir.join(&pkg.name);
        if build_path.exists() {
            std::fs::remove_dir_all(&build_path)?;
        }
        std::fs::create_dir_all(&build_path)?;

        if !pkg.url.is_empty() {
            self.fetch_sources(pkg, &build_path)?;
        }

        if !pkg.build_script.is_empty() {
            require_tools(&["sh"])?;
            ui::status("Building...");
            let script_path = build_path.join("build.sh");
            let script = format!("#!/bin/sh\nset -e\n\n{}\n", pkg.build_script);
            std::fs::write(&script_path, script)?;
            run_in(&build_path, "sh build.sh", &pkg.name)?;
        } else {
            self.default_build(pkg, &build_path)?;
        }

        self.register_installed(pkg, PackageSource::Galactica)?;
        ui::ok(&format!("Installed {}", pkg.name));
        Ok(())
    }

    fn fetch_sources(&self, pkg: &Package, build_path: &Path) -> Result<()> {
        if pkg.url.ends_with(".git") {
            require_tools(&["git"])?;
            ui::status("Cloning source repository...");
            run_in(
                build_path,
                &format!("git clone --depth 1 {} .", pkg.url),
                &pkg.name,
            )?;
            return Ok(());
        }

        ui::status("Downloading source...");
        let file_name = source_file_name(&pkg.url, &pkg.name);
        let src_file = build_path.join(&file_name);
        self.fetcher.get_file(&pkg.url, &src_file)?;

        if file_name.contains(".tar") || file_name.contains(".tgz") {
            ui::status("Extracting...");
            archive::extract_all(&src_file, build_path)?;
        }
        Ok(())
    }

    /// No build script: detect a build system in the (possibly nested)
    /// source root and drive it with the package's build flags.
    fn default_build(&self, pkg: &Package, build_path: &Path) -> Result<()> {
        ui::status("Building with default commands...");
        let src_root = detect_source_root(build_path);
        debug!(dir = %src_root.display(), "source root");

        let configure_flags = pkg
            .build_flags
            .get("configure_flags")
            .map(String::as_str)
            .unwrap_or("--prefix=/usr");
        let make_flags = pkg
            .build_flags
            .get("make_flags")
            .map(String::as_str)
            .unwrap_or("-j$(nproc)");
        let install_target = pkg
            .build_flags
            .get("install_target")
            .map(String::as_str)
            .unwrap_or("install");

        if src_root.join("configure").exists() {
            require_tools(&["sh", "make"])?;
            ui::status("Running configure...");
            run_in(&src_root, &format!("./configure {}", configure_flags), &pkg.name)?;
            ui::status("Running make...");
            run_in(&src_root, &format!("make {}", make_flags), &pkg.name)?;
            ui::status("Installing...");
            run_in(&src_root, &format!("make {}", install_target), &pkg.name)?;
        } else if src_root.join("CMakeLists.txt").exists() {
            require_tools(&["cmake", "make"])?;
            let out = src_root.join("build");
            std::fs::create_dir_all(&out)?;
            ui::status("Running cmake...");
            run_in(&out, "cmake ..", &pkg.name)?;
            run_in(&out, &format!("make {}", make_flags), &pkg.name)?;
            run_in(&out, &format!("make {}", install_target), &pkg.name)?;
        } else if src_root.join("meson.build").exists() {
            require_tools(&["meson", "ninja"])?;
            ui::status("Running meson...");
            run_in(&src_root, "meson setup build", &pkg.name)?;
            run_in(&src_root, "ninja -C build", &pkg.name)?;
            run_in(&src_root, "ninja -C build install", &pkg.name)?;
        } else if src_root.join("Makefile").exists() || src_root.join("makefile").exists() {
            require_tools(&["make"])?;
            ui::status("Running make...");
            run_in(&src_root, &format!("make {}", make_flags), &pkg.name)?;
            ui::status("Installing...");
            run_in(&src_root, &format!("make {}", install_target), &pkg.name)?;
        } else {
            ui::warn("No build system detected, skipping build");
        }
        Ok(())
    }

    fn register_installed(&mut self, pkg: &Package, source: PackageSource) -> Result<()> {
        self.catalog.installed.insert(
            pkg.name.clone(),
            InstalledPackage {
                name: pkg.name.clone(),
                version: pkg.version.clone(),
                source,
            },
        );
        self.catalog.save_installed(self.config)
    }
}

/// Run a shell command in a directory; a non-zero exit is a build error.
fn run_in(dir: &Path, command: &str, package: &str) -> Result<()> {
    debug!(dir = %dir.display(), command = command, "running");
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .status()?;
    if !status.success() {
        return Err(Error::BuildFailed {
            package: package.to_string(),
            message: format!("`{}` exited with {}", command, status),
        });
    }
    Ok(())
}

/// Verify every required tool exists on PATH before any build step runs.
fn require_tools(tools: &[&str]) -> Result<()> {
    for tool in tools {
        if find_in_path(tool).is_none() {
            return Err(Error::MissingTool(tool.to_string()));
        }
    }
    Ok(())
}

/// Locate a command on PATH.
pub fn find_in_path(tool: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|candidate| candidate.is_file())
}

/// An extracted tarball usually nests its tree one directory deep.
fn detect_source_root(build_path: &Path) -> PathBuf {
    if let Ok(entries) = std::fs::read_dir(build_path) {
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                return entry.path();
            }
        }
    }
    build_path.to_path_buf()
}

/// Derive the downloaded file name from a source URL.
fn source_file_name(source_url: &str, package: &str) -> String {
    url::Url::parse(source_url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.last().map(str::to_string))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            warn!(url = source_url, "no file name in URL, using a default");
            format!("{}.tar.gz", package)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_file_name_from_url() {
        assert_eq!(
            source_file_name("https://ftp.gnu.org/gnu/hello/hello-2.12.tar.gz", "hello"),
            "hello-2.12.tar.gz"
        );
        assert_eq!(source_file_name("not a url", "hello"), "hello.tar.gz");
    }

    #[test]
    fn tools_found_on_path() {
        // sh is everywhere the tests run.
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("definitely-not-a-real-tool-42").is_none());
        assert!(require_tools(&["sh"]).is_ok());
        assert!(matches!(
            require_tools(&["sh", "definitely-not-a-real-tool-42"]),
            Err(Error::MissingTool(_))
        ));
    }

    #[test]
    fn nested_source_root_detection() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert_eq!(detect_source_root(tmp.path()), tmp.path());
        std::fs::create_dir(tmp.path().join("hello-2.12")).unwrap();
        assert_eq!(detect_source_root(tmp.path()), tmp.path().join("hello-2.12"));
    }
}
