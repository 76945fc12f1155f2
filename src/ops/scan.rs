use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::address::AddressTable;
use crate::error::{Error, Result};
use crate::hash::hash_path;
use crate::types::{FileEntry, FileKind, Manifest};

/// add one entry per object under `root` to `manifest`
///
/// entries are named by their path below `root` with a leading "/"; the root
/// itself is not recorded. entries carry the manifest's own version and are
/// appended in walk order. on error nothing is appended.
pub fn scan(manifest: &mut Manifest, root: &Path, table: &AddressTable) -> Result<()> {
    if std::fs::symlink_metadata(root).is_err() {
        return Err(Error::NotFound(root.to_path_buf()));
    }

    let version = manifest.header.version;
    let mut entries = Vec::new();
    let mut content_size = 0u64;

    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| walk_error(e, root))?;
        let path = entry.path();

        let name = entry_name(root, path)?;
        let hashed = hash_path(path)?;
        if hashed.kind == FileKind::File {
            content_size += hashed.size;
        }

        let address = table.intern_unchecked(&hashed.digest);
        entries.push(FileEntry::new(name, hashed.kind, address, version));
    }

    debug!(
        manifest = %manifest.name,
        root = %root.display(),
        entries = entries.len(),
        "scanned tree"
    );

    manifest.header.content_size += content_size;
    manifest.files.extend(entries);
    Ok(())
}

fn walk_error(err: walkdir::Error, root: &Path) -> Error {
    let path = err.path().unwrap_or(root).to_path_buf();
    match err.into_io_error() {
        Some(source) => Error::Stat { path, source },
        None => Error::Stat {
            path,
            source: std::io::Error::other("filesystem loop"),
        },
    }
}

fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| Error::InvalidEntryName(path.display().to_string()))?;
    let relative = relative
        .to_str()
        .ok_or_else(|| Error::InvalidEntryName(path.display().to_string()))?;
    Ok(format!("/{}", relative))
}
