//! Dependency resolution.
//!
//! Discovery collects the closure of the requested package, skipping
//! names that are already installed; the closure is then topologically
//! sorted so every dependency precedes its dependents. For binary
//! packages whose dependency list has not been resolved yet, the
//! authoritative list comes from `.PKGINFO` inside the package archive,
//! which is downloaded to the cache on the spot; the repo `depends` data
//! is the fallback when the download fails.

use crate::archive;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::types::{strip_version_constraint, PackageSource};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// A resolved install plan.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Names in install order: dependencies before dependents
    pub order: Vec<String>,
    /// Sum of the known binary download sizes
    pub download_size: u64,
}

pub struct Resolver<'a> {
    catalog: &'a mut Catalog,
    fetcher: &'a Fetcher,
    config: &'a Config,
}

impl<'a> Resolver<'a> {
    pub fn new(catalog: &'a mut Catalog, fetcher: &'a Fetcher, config: &'a Config) -> Self {
        Self {
            catalog,
            fetcher,
            config,
        }
    }

    /// Resolve the install order for `root`. A dependency cycle aborts
    /// the entire resolution.
    pub fn resolve(&mut self, root: &str) -> Result<Resolution> {
        if !self.catalog.packages.contains_key(root) {
            return Err(Error::PackageNotFound(root.to_string()));
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut nodes: Vec<String> = Vec::new();
        let mut edges: Vec<(String, String)> = Vec::new();
        let mut queue: Vec<String> = vec![root.to_string()];

        while let Some(name) = queue.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            if self.catalog.installed.contains_key(&name) {
                debug!(package = %name, "already installed, skipping");
                continue;
            }
            if !self.catalog.packages.contains_key(&name) {
                warn!(package = %name, "dependency not found in catalog");
                continue;
            }
            nodes.push(name.clone());

            for token in self.dependencies_of(&name)? {
                let bare = strip_version_constraint(&token).trim().to_string();
                if bare.is_empty() {
                    continue;
                }
                let dep = self.catalog.resolve_lib_token(&bare);
                if dep == name || self.catalog.installed.contains_key(&dep) {
                    continue;
                }
                edges.push((dep.clone(), name.clone()));
                queue.push(dep);
            }
        }

        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut index = HashMap::new();
        for name in &nodes {
            index.insert(name.clone(), graph.add_node(name.clone()));
        }
        for (dep, dependent) in &edges {
            if let (Some(&a), Some(&b)) = (index.get(dep), index.get(dependent)) {
                graph.add_edge(a, b, ());
            }
        }

        let sorted = toposort(&graph, None)
            .map_err(|_| Error::CircularDependency(root.to_string()))?;
        let order: Vec<String> = sorted.into_iter().map(|n| graph[n].clone()).collect();

        let download_size = order
            .iter()
            .filter_map(|n| self.catalog.packages.get(n))
            .filter(|p| p.source == PackageSource::ArchBinary)
            .map(|p| p.size)
            .sum();

        info!(
            root = root,
            packages = order.len(),
            download_size = download_size,
            "resolution complete"
        );
        Ok(Resolution {
            order,
            download_size,
        })
    }

    /// The authoritative dependency tokens of a package. For binary
    /// packages this may download the archive to read `.PKGINFO`; either
    /// way the package is marked resolved afterwards.
    fn dependencies_of(&mut self, name: &str) -> Result<Vec<String>> {
        let pkg = self
            .catalog
            .packages
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PackageNotFound(name.to_string()))?;

        match pkg.source {
            PackageSource::Galactica | PackageSource::Module => Ok(pkg.dependencies),
            PackageSource::ArchBinary if pkg.deps_resolved => Ok(pkg.dependencies),
            PackageSource::ArchBinary => {
                let cached = self.config.pkg_cache_dir.join(&pkg.filename);
                if !cached.exists() {
                    debug!(package = %name, "downloading to resolve dependencies");
                    for mirror in &self.config.settings.mirrors {
                        let url =
                            format!("{}/{}/os/x86_64/{}", mirror, pkg.repo, pkg.filename);
                        if self.fetcher.get_file(&url, &cached).is_ok() {
                            break;
                        }
                    }
                }

                let deps = if cached.exists() {
                    match archive::read_pkginfo_depends(&cached) {
                        Ok(Some(deps)) => deps,
                        Ok(None) => pkg.dependencies.clone(),
                        Err(e) => {
                            warn!(package = %name, error = %e, "failed to read .PKGINFO");
                            pkg.dependencies.clone()
                        }
                    }
                } else {
                    warn!(package = %name, "download failed, using database dependencies");
                    pkg.dependencies.clone()
                };

                if let Some(entry) = self.catalog.packages.get_mut(name) {
                    entry.dependencies = deps.clone();
                    entry.deps_resolved = true;
                }
                Ok(deps)
            }
        }
    }
}
