//! Archive reading: compressed-tar iteration, extraction with manifest
//! capture, and `.PKGINFO` metadata scans.

use crate::error::{Error, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Open an archive for reading, sniffing gzip/zstd by magic bytes and
/// falling back to plain tar.
fn open_reader(path: &Path) -> Result<Box<dyn Read>> {
    let mut file = std::fs::File::open(path)?;
    let mut magic = [0u8; 4];
    let n = file.read(&mut magic)?;
    // Reopen so the decoder sees the whole stream.
    let file = std::fs::File::open(path)?;

    if n >= 2 && magic[..2] == [0x1f, 0x8b] {
        Ok(Box::new(flate2::read::GzDecoder::new(file)))
    } else if n >= 4 && magic == [0x28, 0xb5, 0x2f, 0xfd] {
        let decoder = zstd::stream::read::Decoder::new(file).map_err(|e| Error::Archive {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Box::new(decoder))
    } else {
        Ok(Box::new(file))
    }
}

fn archive_err(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Archive {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

/// Normalize an entry path: drop a leading `./`.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}

fn is_metadata_entry(rel: &Path) -> bool {
    rel.components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Extract a binary package archive under `root`, preserving permissions
/// and timestamps. Leading-dot metadata entries (`.PKGINFO`, `.MTREE`,
/// `.BUILDINFO`, `.INSTALL`) are skipped. Returns the absolute paths of
/// the regular files written, in extraction order: the manifest.
pub fn extract_with_manifest(archive_path: &Path, root: &Path) -> Result<Vec<String>> {
    let mut archive = tar::Archive::new(open_reader(archive_path)?);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);

    let mut manifest = Vec::new();
    for entry in archive.entries().map_err(|e| archive_err(archive_path, e))? {
        let mut entry = entry.map_err(|e| archive_err(archive_path, e))?;
        let rel = normalize(&entry.path().map_err(|e| archive_err(archive_path, e))?);
        if rel.as_os_str().is_empty() || is_metadata_entry(&rel) {
            continue;
        }

        let target = root.join(&rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entry_type = entry.header().entry_type();
        if !entry_type.is_dir() && target.exists() {
            let _ = std::fs::remove_file(&target);
        }
        entry
            .unpack(&target)
            .map_err(|e| archive_err(archive_path, e))?;

        if entry_type.is_file() {
            manifest.push(format!("/{}", rel.display()));
        }
    }
    debug!(
        archive = %archive_path.display(),
        files = manifest.len(),
        "extracted package archive"
    );
    Ok(manifest)
}

/// Extract every entry of an archive into a directory (repo databases,
/// source tarballs).
pub fn extract_all(archive_path: &Path, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(open_reader(archive_path)?);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    std::fs::create_dir_all(dest)?;
    archive
        .unpack(dest)
        .map_err(|e| archive_err(archive_path, e))
}

/// Iterate the archive until `.PKGINFO` and return its `depend =`
/// entries with version constraints stripped. `None` means the archive
/// carries no `.PKGINFO` at all (as opposed to one with no depends).
pub fn read_pkginfo_depends(archive_path: &Path) -> Result<Option<Vec<String>>> {
    let mut archive = tar::Archive::new(open_reader(archive_path)?);
    for entry in archive.entries().map_err(|e| archive_err(archive_path, e))? {
        let mut entry = entry.map_err(|e| archive_err(archive_path, e))?;
        let rel = normalize(&entry.path().map_err(|e| archive_err(archive_path, e))?);
        if rel.as_os_str() != ".PKGINFO" {
            continue;
        }
        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|e| archive_err(archive_path, e))?;
        return Ok(Some(parse_pkginfo_depends(&content)));
    }
    debug!(archive = %archive_path.display(), "no .PKGINFO in archive");
    Ok(None)
}

/// Parse `depend = name[<op>version]` lines from a `.PKGINFO` body.
pub fn parse_pkginfo_depends(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| line.trim().strip_prefix("depend = "))
        .map(|dep| crate::types::strip_version_constraint(dep).trim().to_string())
        .filter(|dep| !dep.is_empty())
        .collect()
}
