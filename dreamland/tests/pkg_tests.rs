//! End-to-end package manager tests against a tempdir install root.
//!
//! Archive fixtures are built in-process; nothing touches the network.

use dreamland::catalog::Catalog;
use dreamland::fetch::Fetcher;
use dreamland::resolver::Resolver;
use dreamland::{Config, Dreamland, InstallOptions, InstalledPackage, Package, PackageSource, Settings};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

struct Fixture {
    dreamland: Dreamland,
    root: std::path::PathBuf,
    _tmp: TempDir,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().expect("tempdir");
    let root = tmp.path().join("root");
    std::fs::create_dir_all(&root).unwrap();
    let settings = Settings {
        install_root: root.clone(),
        ..Settings::default()
    };
    let config = Config::from_bases(settings, &tmp.path().join("cache"), &tmp.path().join("data"))
        .expect("config");
    let dreamland = Dreamland::with_config(config).expect("dreamland");
    Fixture {
        dreamland,
        root,
        _tmp: tmp,
    }
}

/// Write a gzipped tar package archive with `.PKGINFO` metadata and a
/// couple of real files.
fn write_package_archive(path: &Path, pkginfo: &str, files: &[(&str, &str, u32)]) {
    let file = std::fs::File::create(path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut add_file = |name: &str, content: &[u8], mode: u32| {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        builder.append_data(&mut header, name, content).unwrap();
    };

    add_file(".PKGINFO", pkginfo.as_bytes(), 0o644);
    add_file(".MTREE", b"#mtree", 0o644);

    let mut dirs: Vec<&str> = Vec::new();
    for (name, _, _) in files {
        let mut ancestors = Path::new(name).ancestors().skip(1).collect::<Vec<_>>();
        ancestors.reverse();
        for dir in ancestors {
            let dir = dir.to_str().unwrap();
            if !dir.is_empty() && !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
    }
    for dir in dirs {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{}/", dir), &[][..])
            .unwrap();
    }
    for (name, content, mode) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append_data(&mut header, *name, content.as_bytes()).unwrap();
    }

    builder.into_inner().unwrap().finish().unwrap().flush().unwrap();
}

fn binary_package(name: &str, version: &str, deps: &[&str]) -> Package {
    let mut pkg = Package::new(name, PackageSource::ArchBinary);
    pkg.version = version.to_string();
    pkg.repo = "extra".to_string();
    pkg.filename = format!("{}-{}-x86_64.pkg.tar.zst", name, version);
    pkg.size = 1000;
    pkg.dependencies = deps.iter().map(|s| s.to_string()).collect();
    pkg.deps_resolved = true;
    pkg
}

fn mark_installed(catalog: &mut Catalog, name: &str, source: PackageSource) {
    catalog.installed.insert(
        name.to_string(),
        InstalledPackage {
            name: name.to_string(),
            version: "1.0-1".to_string(),
            source,
        },
    );
}

#[test]
fn binary_install_writes_manifest_and_registry() {
    let mut fx = fixture();
    let pkg = binary_package("vim", "9.1-1", &["ncurses", "libc"]);
    let archive_path = fx.dreamland.config.pkg_cache_dir.join(&pkg.filename);
    write_package_archive(
        &archive_path,
        "pkgname = vim\ndepend = ncurses\ndepend = libc\n",
        &[
            ("usr/bin/vim", "#!ELF vim", 0o755),
            ("usr/share/vim/help.txt", "help", 0o644),
        ],
    );
    fx.dreamland.catalog.packages.insert("vim".into(), pkg);
    mark_installed(&mut fx.dreamland.catalog, "ncurses", PackageSource::ArchBinary);
    mark_installed(&mut fx.dreamland.catalog, "libc", PackageSource::ArchBinary);

    fx.dreamland
        .install("vim", InstallOptions { assume_yes: true, force_binary: false })
        .expect("install");

    // The archive's regular files landed under the install root...
    assert!(fx.root.join("usr/bin/vim").is_file());
    assert!(fx.root.join("usr/share/vim/help.txt").is_file());
    // ...but none of the metadata entries did.
    assert!(!fx.root.join(".PKGINFO").exists());
    assert!(!fx.root.join(".MTREE").exists());

    // The manifest lists exactly the regular files, in extraction order.
    let manifest_path = fx.dreamland.config.manifest_dir.join("vim.manifest");
    let manifest = std::fs::read_to_string(&manifest_path).unwrap();
    let lines: Vec<&str> = manifest.lines().collect();
    assert_eq!(lines, vec!["/usr/bin/vim", "/usr/share/vim/help.txt"]);

    // The registry records name, version and the binary source tag.
    let registry = std::fs::read_to_string(&fx.dreamland.config.installed_file).unwrap();
    assert!(registry.contains("vim 9.1-1 arch"), "{}", registry);
}

#[test]
fn second_install_is_a_warning_noop() {
    let mut fx = fixture();
    let pkg = binary_package("vim", "9.1-1", &[]);
    let archive_path = fx.dreamland.config.pkg_cache_dir.join(&pkg.filename);
    write_package_archive(&archive_path, "pkgname = vim\n", &[("usr/bin/vim", "vim", 0o755)]);
    fx.dreamland.catalog.packages.insert("vim".into(), pkg);

    let opts = InstallOptions { assume_yes: true, force_binary: false };
    fx.dreamland.install("vim", opts).expect("first install");
    // Second call succeeds without reinstalling.
    fx.dreamland.install("vim", opts).expect("second install is a no-op");
}

#[test]
fn remove_deletes_manifest_files_and_registry_entry() {
    let mut fx = fixture();
    let pkg = binary_package("vim", "9.1-1", &[]);
    let archive_path = fx.dreamland.config.pkg_cache_dir.join(&pkg.filename);
    write_package_archive(
        &archive_path,
        "pkgname = vim\n",
        &[
            ("usr/bin/vim", "vim", 0o755),
            ("usr/share/vim/help.txt", "help", 0o644),
        ],
    );
    fx.dreamland.catalog.packages.insert("vim".into(), pkg);
    fx.dreamland
        .install("vim", InstallOptions { assume_yes: true, force_binary: false })
        .expect("install");

    // One manifest file vanished out-of-band; removal tolerates it.
    std::fs::remove_file(fx.root.join("usr/share/vim/help.txt")).unwrap();

    fx.dreamland.remove("vim", false, true).expect("remove");

    assert!(!fx.root.join("usr/bin/vim").exists());
    assert!(!fx.dreamland.config.manifest_dir.join("vim.manifest").exists());
    let registry = std::fs::read_to_string(&fx.dreamland.config.installed_file).unwrap();
    assert!(!registry.contains("vim"));

    // Removing again is an error: the registry no longer knows the name.
    assert!(fx.dreamland.remove("vim", false, true).is_err());
}

#[test]
fn remove_without_manifest_only_drops_registry_entry() {
    let mut fx = fixture();
    mark_installed(&mut fx.dreamland.catalog, "ghost", PackageSource::ArchBinary);
    fx.dreamland.catalog.save_installed(&fx.dreamland.config).unwrap();

    fx.dreamland.remove("ghost", false, true).expect("remove");
    let registry = std::fs::read_to_string(&fx.dreamland.config.installed_file).unwrap();
    assert!(!registry.contains("ghost"));
}

#[test]
fn install_unknown_package_fails() {
    let mut fx = fixture();
    let err = fx
        .dreamland
        .install("no-such-package", InstallOptions { assume_yes: true, force_binary: false })
        .unwrap_err();
    assert!(matches!(err, dreamland::Error::PackageNotFound(_)));
}

#[test]
fn source_install_runs_build_script() {
    let mut fx = fixture();
    let mut pkg = Package::new("hello", PackageSource::Galactica);
    pkg.version = "2.12".to_string();
    pkg.build_script = "touch built-marker".to_string();
    fx.dreamland.catalog.packages.insert("hello".into(), pkg);

    fx.dreamland
        .install("hello", InstallOptions { assume_yes: true, force_binary: false })
        .expect("source install");

    assert!(fx.dreamland.config.build_dir.join("hello/built-marker").is_file());
    let registry = std::fs::read_to_string(&fx.dreamland.config.installed_file).unwrap();
    assert!(registry.contains("hello 2.12 galactica"), "{}", registry);
}

#[test]
fn failing_build_script_aborts_install() {
    let mut fx = fixture();
    let mut pkg = Package::new("broken", PackageSource::Galactica);
    pkg.version = "1".to_string();
    pkg.build_script = "exit 3".to_string();
    fx.dreamland.catalog.packages.insert("broken".into(), pkg);

    let err = fx
        .dreamland
        .install("broken", InstallOptions { assume_yes: true, force_binary: false })
        .unwrap_err();
    assert!(matches!(err, dreamland::Error::BuildFailed { .. }));
    // The registry was not updated.
    let registry =
        std::fs::read_to_string(&fx.dreamland.config.installed_file).unwrap_or_default();
    assert!(!registry.contains("broken"));
}

#[test]
fn pkginfo_deps_resolved_from_cached_archive() {
    let fx = fixture();
    let mut vim = binary_package("vim", "9.1-1", &[]);
    vim.deps_resolved = false;
    let archive_path = fx.dreamland.config.pkg_cache_dir.join(&vim.filename);
    write_package_archive(
        &archive_path,
        "pkgname = vim\ndepend = ncurses>=6\n",
        &[("usr/bin/vim", "vim", 0o755)],
    );

    let mut catalog = Catalog::default();
    catalog.packages.insert("vim".into(), vim);
    catalog
        .packages
        .insert("ncurses".into(), binary_package("ncurses", "6.4-1", &[]));

    let fetcher = Fetcher::new(true).unwrap();
    let resolution = Resolver::new(&mut catalog, &fetcher, &fx.dreamland.config)
        .resolve("vim")
        .expect("resolve");

    assert_eq!(resolution.order, vec!["ncurses", "vim"]);
    // The authoritative list was captured and the package marked resolved.
    let vim = &catalog.packages["vim"];
    assert!(vim.deps_resolved);
    assert_eq!(vim.dependencies, vec!["ncurses"]);
}

#[test]
fn failed_sync_leaves_prior_catalog_intact() {
    let tmp = TempDir::new().unwrap();
    // Nothing listens here; every fetch fails with connection refused.
    let settings = Settings {
        mirrors: vec!["http://127.0.0.1:9".to_string()],
        galactica_url: "http://127.0.0.1:9/".to_string(),
        ..Settings::default()
    };
    let config = Config::from_bases(settings, &tmp.path().join("cache"), &tmp.path().join("data"))
        .unwrap();
    let mut dreamland = Dreamland::with_config(config).unwrap();
    dreamland
        .catalog
        .packages
        .insert("vim".into(), binary_package("vim", "9.1-1", &[]));
    dreamland.catalog.save_catalog(&dreamland.config).unwrap();

    let err = dreamland.sync().unwrap_err();
    assert!(matches!(err, dreamland::Error::SyncFailed));

    // No partial overwrite: the on-disk catalog still has the old data.
    let reloaded = dreamland::catalog::Catalog::load(&dreamland.config).unwrap();
    assert!(reloaded.packages.contains_key("vim"));
}

#[test]
fn cascade_remove_takes_dependents_first() {
    let mut fx = fixture();
    fx.dreamland
        .catalog
        .packages
        .insert("lib".into(), binary_package("lib", "1.0-1", &[]));
    fx.dreamland
        .catalog
        .packages
        .insert("app".into(), binary_package("app", "1.0-1", &["lib"]));
    mark_installed(&mut fx.dreamland.catalog, "lib", PackageSource::ArchBinary);
    mark_installed(&mut fx.dreamland.catalog, "app", PackageSource::ArchBinary);

    fx.dreamland.remove("lib", true, true).expect("cascade remove");
    let registry =
        std::fs::read_to_string(&fx.dreamland.config.installed_file).unwrap_or_default();
    assert!(!registry.contains("app"));
    assert!(!registry.contains("lib"));
}

#[test]
fn autoremove_offers_only_leaves() {
    let mut fx = fixture();
    fx.dreamland
        .catalog
        .packages
        .insert("lib".into(), binary_package("lib", "1.0-1", &[]));
    fx.dreamland
        .catalog
        .packages
        .insert("app".into(), binary_package("app", "1.0-1", &["lib"]));
    mark_installed(&mut fx.dreamland.catalog, "lib", PackageSource::ArchBinary);
    mark_installed(&mut fx.dreamland.catalog, "app", PackageSource::ArchBinary);

    fx.dreamland.autoremove(true).expect("autoremove");
    let registry =
        std::fs::read_to_string(&fx.dreamland.config.installed_file).unwrap_or_default();
    // app is a leaf; lib is still depended upon at scan time.
    assert!(!registry.contains("app"));
    assert!(registry.contains("lib"));
}
