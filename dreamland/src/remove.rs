//! Package removal: manifest-driven deletion for binary packages,
//! module unloading, cascade removal and autoremove.

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::modules::ModuleHost;
use crate::types::{strip_version_constraint, PackageSource};
use crate::ui;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

pub struct Remover<'a> {
    config: &'a Config,
    catalog: &'a mut Catalog,
    modules: &'a mut ModuleHost,
}

impl<'a> Remover<'a> {
    pub fn new(config: &'a Config, catalog: &'a mut Catalog, modules: &'a mut ModuleHost) -> Self {
        Self {
            config,
            catalog,
            modules,
        }
    }

    /// Remove one installed package and flush the registry.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let installed = self
            .catalog
            .installed
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotInstalled(name.to_string()))?;

        ui::status(&format!("Uninstalling: {}", name));
        match installed.source {
            PackageSource::Module => {
                self.modules.unload_and_delete(name, &self.config.modules_dir)?;
                ui::ok("Module removed");
            }
            PackageSource::ArchBinary => {
                let manifest = self.config.manifest_dir.join(format!("{}.manifest", name));
                if manifest.exists() {
                    let removed =
                        remove_manifest_files(&manifest, &self.config.settings.install_root)?;
                    std::fs::remove_file(&manifest)?;
                    ui::ok(&format!("Removed {} files", removed));
                } else {
                    ui::warn("No manifest, removing registry entry only");
                }
            }
            // Source builds own their installed paths.
            PackageSource::Galactica => {}
        }

        self.catalog.installed.remove(name);
        self.catalog.save_installed(self.config)?;
        ui::ok(&format!("Uninstalled: {}", name));
        Ok(())
    }

    /// Installed packages whose dependency lists (from the catalog) name
    /// the target, transitively. Dependents come first so removal order
    /// is safe.
    pub fn cascade_set(&self, name: &str) -> Vec<String> {
        let mut dependents: Vec<String> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        seen.insert(name.to_string());
        let mut frontier = vec![name.to_string()];

        while let Some(target) = frontier.pop() {
            for installed in self.catalog.installed.keys() {
                if seen.contains(installed) {
                    continue;
                }
                if self.depends_on(installed, &target) {
                    seen.insert(installed.clone());
                    dependents.push(installed.clone());
                    frontier.push(installed.clone());
                }
            }
        }

        dependents.reverse();
        dependents
    }

    /// Remove the target and everything installed that depends on it.
    pub fn remove_cascade(&mut self, name: &str, assume_yes: bool) -> Result<()> {
        if !self.catalog.installed.contains_key(name) {
            return Err(Error::NotInstalled(name.to_string()));
        }
        let dependents = self.cascade_set(name);
        if !dependents.is_empty() {
            println!("The following installed packages depend on {}:", name);
            for dep in &dependents {
                println!("  {}", dep);
            }
            if !assume_yes {
                let proceed = dialoguer::Confirm::new()
                    .with_prompt("Remove them as well?")
                    .default(false)
                    .interact()?;
                if !proceed {
                    return Err(Error::Cancelled);
                }
            }
        }
        for dep in dependents {
            self.remove(&dep)?;
        }
        self.remove(name)
    }

    /// Installed packages that nothing else installed depends on.
    pub fn autoremove_candidates(&self) -> Vec<String> {
        self.catalog
            .installed
            .keys()
            .filter(|candidate| {
                !self
                    .catalog
                    .installed
                    .keys()
                    .any(|other| other != *candidate && self.depends_on(other, candidate))
            })
            .cloned()
            .collect()
    }

    /// Offer to remove every leaf package.
    pub fn autoremove(&mut self, assume_yes: bool) -> Result<()> {
        let candidates = self.autoremove_candidates();
        if candidates.is_empty() {
            ui::ok("Nothing to autoremove");
            return Ok(());
        }
        println!("Packages no other installed package depends on:");
        for name in &candidates {
            println!("  {}", name);
        }
        if !assume_yes {
            let proceed = dialoguer::Confirm::new()
                .with_prompt("Remove them?")
                .default(false)
                .interact()?;
            if !proceed {
                return Err(Error::Cancelled);
            }
        }
        for name in candidates {
            self.remove(&name)?;
        }
        Ok(())
    }

    /// Does `pkg`'s catalog dependency list name `target`?
    fn depends_on(&self, pkg: &str, target: &str) -> bool {
        let Some(entry) = self.catalog.packages.get(pkg) else {
            return false;
        };
        entry.dependencies.iter().any(|token| {
            let bare = strip_version_constraint(token);
            bare == target || self.catalog.resolve_lib_token(bare) == target
        })
    }
}

/// Delete every path listed in a manifest under the install root, files
/// before their directories, tolerating entries that are already gone.
fn remove_manifest_files(manifest: &Path, root: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(manifest)?;
    let mut paths: Vec<&str> = content.lines().filter(|l| !l.is_empty()).collect();
    // Reverse lexicographic order removes deeper paths first.
    paths.sort_unstable_by(|a, b| b.cmp(a));

    let mut removed = 0;
    for path in paths {
        let full = root.join(path.trim_start_matches('/'));
        match std::fs::remove_file(&full) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = %full.display(), error = %e, "could not remove file"),
        }
    }
    info!(manifest = %manifest.display(), removed = removed, "manifest files removed");
    Ok(removed)
}
