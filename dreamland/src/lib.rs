//! Dreamland package manager.
//!
//! Two repositories feed one local catalog: the Galactica source
//! repository (descriptor files, built on the target machine) and the
//! Arch binary mirrors (prebuilt archives, extracted with a manifest for
//! later removal). Dependency resolution is topological over both.
//! Loadable modules extend the CLI verb set through a C ABI.

pub mod archive;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod install;
pub mod modules;
pub mod remove;
pub mod repo;
pub mod resolver;
pub mod types;
pub mod ui;

pub use config::{Config, Settings};
pub use error::{Error, Result};
pub use install::InstallOptions;
pub use types::{InstalledPackage, Package, PackageSource};

use console::style;

/// The package manager: configuration, catalog, fetcher and the module
/// host, wired together for the CLI.
pub struct Dreamland {
    pub config: Config,
    fetcher: fetch::Fetcher,
    pub catalog: catalog::Catalog,
    pub modules: modules::ModuleHost,
}

impl Dreamland {
    /// Initialize from the user's environment and load any modules.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::load()?)
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let fetcher = fetch::Fetcher::new(config.settings.verify_tls)?;
        let catalog = catalog::Catalog::load(&config)?;
        let modules = modules::ModuleHost::load_all(&config.module_search_paths);
        Ok(Self {
            config,
            fetcher,
            catalog,
            modules,
        })
    }

    /// Sync both repositories into the local catalog.
    pub fn sync(&mut self) -> Result<()> {
        ui::banner();
        let summary = repo::sync(&self.config, &self.fetcher, &mut self.catalog)?;
        if let Some(mirror) = &summary.mirror {
            ui::ok(&format!("Successfully synced from {}", mirror));
        }
        ui::ok("Sync complete");
        println!("  {} packages available", self.catalog.packages.len());
        println!("  {} modules loaded", self.modules.modules().len());
        Ok(())
    }

    /// Install a package (and its missing dependencies).
    pub fn install(&mut self, name: &str, opts: InstallOptions) -> Result<()> {
        install::Installer::new(&self.config, &self.fetcher, &mut self.catalog)
            .install(name, opts)
    }

    /// Remove an installed package, optionally cascading to dependents.
    pub fn remove(&mut self, name: &str, cascade: bool, assume_yes: bool) -> Result<()> {
        let mut remover =
            remove::Remover::new(&self.config, &mut self.catalog, &mut self.modules);
        if cascade {
            remover.remove_cascade(name, assume_yes)
        } else {
            remover.remove(name)
        }
    }

    /// Remove packages nothing else depends on.
    pub fn autoremove(&mut self, assume_yes: bool) -> Result<()> {
        remove::Remover::new(&self.config, &mut self.catalog, &mut self.modules)
            .autoremove(assume_yes)
    }

    /// Substring search over names and descriptions.
    pub fn search(&self, query: &str) {
        for (name, pkg) in &self.catalog.packages {
            if name.contains(query) || pkg.description.contains(query) {
                let marker = if self.catalog.installed.contains_key(name) {
                    format!(" {}", style("[installed]").green())
                } else {
                    String::new()
                };
                println!("{} {}{}", style(name).magenta(), pkg.version, marker);
            }
        }
    }

    /// List the installed registry.
    pub fn list_installed(&self) {
        ui::banner();
        if self.catalog.installed.is_empty() {
            ui::warn("Nothing installed");
            return;
        }
        for pkg in self.catalog.installed.values() {
            let tag = match pkg.source {
                PackageSource::Module => style("[module]").magenta(),
                PackageSource::Galactica => style("[source]").cyan(),
                PackageSource::ArchBinary => style("[binary]").yellow(),
            };
            println!("  {} {} {}", pkg.name, pkg.version, tag);
        }
    }

    /// List loaded modules and their commands.
    pub fn list_modules(&self) {
        ui::banner();
        let modules = self.modules.modules();
        println!("Modules ({}):\n", modules.len());
        if modules.is_empty() {
            println!("  None. Install: dreamland install module-<name>");
            return;
        }
        for module in modules {
            println!("  {} v{}", style(&module.name).magenta(), module.version);
            println!("    {}", module.description);
            for cmd in &module.commands {
                println!("      {} - {}", style(&cmd.name).cyan(), cmd.description);
            }
            println!();
        }
    }

    /// Dispatch a verb contributed by a loaded module.
    pub fn run_module_command(&self, verb: &str, args: &[String]) -> Option<i32> {
        self.modules.run_command(verb, args)
    }
}
