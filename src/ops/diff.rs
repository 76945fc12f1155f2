use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use crate::error::{Error, Result};
use crate::ops::heuristics::{apply_heuristics, Heuristic};
use crate::types::{ChangeKind, DiffEntry, FileEntry, Manifest};

/// what a diff found between a new manifest and its baseline
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// per-name changes, sorted by path
    pub changes: Vec<DiffEntry>,
    /// the include set differs from the baseline's
    pub includes_changed: bool,
}

impl DiffSummary {
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }

    pub fn added(&self) -> usize {
        self.count(ChangeKind::Added)
    }

    pub fn modified(&self) -> usize {
        self.count(ChangeKind::Modified)
    }

    pub fn deleted(&self) -> usize {
        self.count(ChangeKind::Deleted)
    }

    /// nothing warrants a new manifest version
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty() && !self.includes_changed
    }
}

/// result of running a freshly scanned manifest through the update pipeline
#[derive(Clone, Debug)]
pub enum UpdateOutcome {
    /// a new manifest version, sorted and ready to persist
    Updated {
        manifest: Manifest,
        summary: DiffSummary,
    },
    /// nothing changed; the header carries the baseline's version again
    Unchanged { manifest: Manifest },
}

impl UpdateOutcome {
    pub fn manifest(&self) -> &Manifest {
        match self {
            UpdateOutcome::Updated { manifest, .. } | UpdateOutcome::Unchanged { manifest } => {
                manifest
            }
        }
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, UpdateOutcome::Updated { .. })
    }
}

/// names present (not deleted) in both manifests with a different kind, sorted
pub fn detect_type_changes(new: &Manifest, old: &Manifest) -> Vec<String> {
    let old_index = old.index();
    let mut changed: Vec<String> = new
        .present_files()
        .filter(|file| {
            old_index
                .get(file.name.as_str())
                .is_some_and(|peer| !peer.is_deleted() && peer.kind != file.kind)
        })
        .map(|file| file.name.clone())
        .collect();
    changed.sort();
    changed
}

/// diff `new` against its baseline `old`, in place
///
/// unchanged entries take the baseline's version, changed entries the new
/// manifest's version. names that disappeared get a deletion record stamped
/// with the new version. deletion records already in the baseline are carried
/// over untouched as long as the manifest format did not change.
///
/// fails without modifying `new` if any entry changed kind.
pub fn diff_manifests(new: &mut Manifest, old: &Manifest) -> Result<DiffSummary> {
    let type_changes = detect_type_changes(new, old);
    if !type_changes.is_empty() {
        return Err(Error::UnsupportedTypeChange {
            manifest: new.name.clone(),
            paths: type_changes,
        });
    }

    let version = new.header.version;
    let old_index = old.index();
    let mut changes = Vec::new();

    // link peers
    for file in new.files.iter_mut() {
        let Some(peer) = old_index.get(file.name.as_str()) else {
            continue;
        };
        if peer.address == file.address {
            file.version = peer.version;
        } else {
            file.version = version;
            changes.push(DiffEntry {
                path: file.name.clone(),
                kind: ChangeKind::Modified,
            });
        }
    }

    // deletions
    let carry_tombstones = old.header.format == new.header.format;
    let present: HashSet<&str> = new.files.iter().map(|f| f.name.as_str()).collect();
    let mut deleted = Vec::new();
    for old_file in &old.files {
        if present.contains(old_file.name.as_str()) {
            continue;
        }
        if old_file.is_deleted() {
            if carry_tombstones {
                deleted.push(old_file.clone());
            }
            continue;
        }
        deleted.push(FileEntry::deleted(old_file.name.clone(), old_file.kind, version));
        changes.push(DiffEntry {
            path: old_file.name.clone(),
            kind: ChangeKind::Deleted,
        });
    }

    // additions
    for file in new.present_files() {
        if !old_index.contains_key(file.name.as_str()) {
            changes.push(DiffEntry {
                path: file.name.clone(),
                kind: ChangeKind::Added,
            });
        }
    }

    new.files.extend(deleted);
    changes.sort_by(|a, b| a.path.cmp(&b.path));

    let includes_changed = include_set(new) != include_set(old);

    Ok(DiffSummary {
        changes,
        includes_changed,
    })
}

fn include_set(manifest: &Manifest) -> BTreeSet<&str> {
    manifest.includes.iter().map(String::as_str).collect()
}

/// diff, then either skip the manifest as a no-op or finish it for persisting
///
/// a finished manifest has had `heuristics` applied and is in canonical
/// (version, name) order.
pub fn update_manifest(
    mut new: Manifest,
    old: &Manifest,
    heuristics: &[Box<dyn Heuristic>],
) -> Result<UpdateOutcome> {
    let summary = diff_manifests(&mut new, old)?;

    if summary.is_noop() {
        new.header.version = old.header.version;
        debug!(manifest = %new.name, version = new.header.version, "no changes");
        return Ok(UpdateOutcome::Unchanged { manifest: new });
    }

    apply_heuristics(&mut new, heuristics);
    new.sort_by_version_name();

    debug!(
        manifest = %new.name,
        version = new.header.version,
        added = summary.added(),
        modified = summary.modified(),
        deleted = summary.deleted(),
        includes_changed = summary.includes_changed,
        "manifest changed"
    );

    Ok(UpdateOutcome::Updated {
        manifest: new,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, AddressTable};
    use crate::config::ModifierRule;
    use crate::ops::heuristics::heuristics_from_rules;
    use crate::ops::scan::scan;
    use crate::types::{FileKind, ManifestHeader, Modifier};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    const DIGEST_A: &str = "6c27df6efcd6fc401ff1bc67c970b83eef115f6473db4fb9d57e5de317eba96e";
    const DIGEST_B: &str = "b85f1dc2c2317a20f47a36d3257313b131124ffa6d4f19bb060d43014fd386b0";

    fn manifest(version: u32, previous: u32) -> Manifest {
        Manifest::new("bundle", ManifestHeader::new(1, version, previous, 0))
    }

    fn write_file(path: &std::path::Path, content: &str, mode: u32) {
        fs::write(path, content).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    fn scanned(root: &std::path::Path, version: u32, previous: u32, table: &AddressTable) -> Manifest {
        let mut m = manifest(version, previous);
        scan(&mut m, root, table).unwrap();
        m
    }

    #[test]
    fn test_diff_against_itself_is_noop() {
        let table = AddressTable::new();
        let a = table.intern(DIGEST_A).unwrap();
        let mut old = manifest(10, 5).with_includes(["base"]);
        old.files = vec![
            FileEntry::new("/a", FileKind::File, a, 5),
            FileEntry::new("/d", FileKind::Directory, a, 10),
            FileEntry::deleted("/gone", FileKind::File, 7),
        ];

        let mut new = old.clone();
        let summary = diff_manifests(&mut new, &old).unwrap();
        assert_eq!(summary.added(), 0);
        assert_eq!(summary.deleted(), 0);
        assert_eq!(summary.modified(), 0);
        assert!(summary.is_noop());

        let mut next = old.clone();
        next.header.version = 20;
        next.header.previous = 10;
        match update_manifest(next, &old, &[]).unwrap() {
            UpdateOutcome::Unchanged { manifest } => assert_eq!(manifest.header.version, 10),
            other => panic!("expected no-op, got {:?}", other),
        }
    }

    #[test]
    fn test_simple_add() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("a"), "alpha", 0o644);
        write_file(&root.join("b"), "beta", 0o644);

        let table = AddressTable::new();
        let old = scanned(root, 1, 0, &table);

        write_file(&root.join("c"), "gamma", 0o644);
        let new = scanned(root, 2, 1, &table);

        let UpdateOutcome::Updated { manifest, summary } = update_manifest(new, &old, &[]).unwrap()
        else {
            panic!("expected a new manifest");
        };

        assert_eq!(manifest.get("/a").unwrap().version, 1);
        assert_eq!(manifest.get("/b").unwrap().version, 1);
        assert_eq!(manifest.get("/c").unwrap().version, 2);
        assert_eq!(summary.added(), 1);
        assert_eq!(summary.modified(), 0);
        assert_eq!(summary.deleted(), 0);
        assert_eq!(manifest.header.version, 2);
    }

    #[test]
    fn test_permission_change_is_content_change() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("a"), "alpha", 0o644);

        let table = AddressTable::new();
        let old = scanned(root, 1, 0, &table);

        fs::set_permissions(root.join("a"), fs::Permissions::from_mode(0o600)).unwrap();
        let mut new = scanned(root, 2, 1, &table);
        assert_ne!(new.get("/a").unwrap().address, old.get("/a").unwrap().address);

        let summary = diff_manifests(&mut new, &old).unwrap();
        assert_eq!(summary.modified(), 1);
        assert_eq!(new.get("/a").unwrap().version, 2);
    }

    #[test]
    fn test_deletion_records() {
        let table = AddressTable::new();
        let a = table.intern(DIGEST_A).unwrap();
        let b = table.intern(DIGEST_B).unwrap();

        let mut old = manifest(10, 0);
        old.files = vec![
            FileEntry::new("/a", FileKind::File, a, 10),
            FileEntry::new("/b", FileKind::Link, b, 10),
            FileEntry::new("/c", FileKind::Directory, a, 10),
        ];
        let mut new = manifest(20, 10);
        new.files = vec![FileEntry::new("/a", FileKind::File, a, 20)];

        let summary = diff_manifests(&mut new, &old).unwrap();
        assert_eq!(summary.deleted(), 2);

        for name in ["/b", "/c"] {
            let records: Vec<_> = new.files.iter().filter(|f| f.name == name).collect();
            assert_eq!(records.len(), 1);
            assert!(records[0].is_deleted());
            assert_eq!(records[0].address, Address::ZERO);
            assert_eq!(records[0].version, 20);
            assert_eq!(records[0].kind, old.get(name).unwrap().kind);
        }
        assert_eq!(new.get("/a").unwrap().version, 10);
    }

    #[test]
    fn test_old_tombstones_carried_same_format() {
        let table = AddressTable::new();
        let a = table.intern(DIGEST_A).unwrap();

        let mut old = manifest(10, 0);
        old.files = vec![
            FileEntry::new("/a", FileKind::File, a, 10),
            FileEntry::deleted("/old", FileKind::File, 5),
        ];
        let mut new = manifest(20, 10);
        new.files = vec![FileEntry::new("/a", FileKind::File, a, 20)];

        let summary = diff_manifests(&mut new, &old).unwrap();
        assert!(summary.is_noop());
        let tombstone = new.get("/old").unwrap();
        assert!(tombstone.is_deleted());
        assert_eq!(tombstone.version, 5);
    }

    #[test]
    fn test_old_tombstones_dropped_on_format_bump() {
        let table = AddressTable::new();
        let a = table.intern(DIGEST_A).unwrap();

        let mut old = manifest(10, 0);
        old.files = vec![
            FileEntry::new("/a", FileKind::File, a, 10),
            FileEntry::deleted("/old", FileKind::File, 5),
        ];
        let mut new = Manifest::new("bundle", ManifestHeader::new(2, 20, 10, 0));
        new.files = vec![FileEntry::new("/a", FileKind::File, a, 20)];

        diff_manifests(&mut new, &old).unwrap();
        assert!(new.get("/old").is_none());
    }

    #[test]
    fn test_resurrected_file_is_modified() {
        let table = AddressTable::new();
        let a = table.intern(DIGEST_A).unwrap();

        let mut old = manifest(10, 0);
        old.files = vec![FileEntry::deleted("/back", FileKind::File, 10)];
        let mut new = manifest(20, 10);
        new.files = vec![FileEntry::new("/back", FileKind::Directory, a, 20)];

        let summary = diff_manifests(&mut new, &old).unwrap();
        assert_eq!(summary.modified(), 1);
        assert_eq!(summary.added(), 0);
        assert_eq!(new.get("/back").unwrap().version, 20);
    }

    #[test]
    fn test_type_change_rejected() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("x"), "file", 0o644);

        let table = AddressTable::new();
        let old = scanned(root, 1, 0, &table);

        fs::remove_file(root.join("x")).unwrap();
        fs::create_dir(root.join("x")).unwrap();
        let new = scanned(root, 2, 1, &table);
        let before = new.clone();

        let mut attempt = new.clone();
        match diff_manifests(&mut attempt, &old) {
            Err(Error::UnsupportedTypeChange { manifest, paths }) => {
                assert_eq!(manifest, "bundle");
                assert_eq!(paths, vec!["/x".to_string()]);
            }
            other => panic!("expected type change error, got {:?}", other),
        }
        assert_eq!(attempt, before);

        assert!(matches!(
            update_manifest(new, &old, &[]),
            Err(Error::UnsupportedTypeChange { .. })
        ));
    }

    #[test]
    fn test_include_change_alone_forces_update() {
        let table = AddressTable::new();
        let a = table.intern(DIGEST_A).unwrap();

        let mut old = manifest(10, 0).with_includes(["base"]);
        old.files = vec![FileEntry::new("/a", FileKind::File, a, 10)];
        let mut new = manifest(20, 10).with_includes(["base", "net"]);
        new.files = vec![FileEntry::new("/a", FileKind::File, a, 20)];

        let outcome = update_manifest(new, &old, &[]).unwrap();
        let UpdateOutcome::Updated { manifest, summary } = outcome else {
            panic!("expected a new manifest");
        };
        assert!(summary.includes_changed);
        assert!(summary.changes.is_empty());
        assert_eq!(manifest.header.version, 20);
        assert_eq!(manifest.get("/a").unwrap().version, 10);
    }

    #[test]
    fn test_include_order_is_not_a_change() {
        let mut old = manifest(10, 0).with_includes(["a", "b"]);
        let mut new = manifest(20, 10).with_includes(["b", "a"]);
        old.files.clear();
        new.files.clear();
        assert!(diff_manifests(&mut new, &old).unwrap().is_noop());
    }

    #[test]
    fn test_update_sorts_and_applies_heuristics() {
        let table = AddressTable::new();
        let a = table.intern(DIGEST_A).unwrap();
        let b = table.intern(DIGEST_B).unwrap();

        let mut old = manifest(10, 0);
        old.files = vec![
            FileEntry::new("/z", FileKind::File, a, 10),
            FileEntry::new("/etc/conf", FileKind::File, a, 10),
        ];
        let mut new = manifest(20, 10);
        new.files = vec![
            FileEntry::new("/y", FileKind::File, b, 20),
            FileEntry::new("/etc/conf", FileKind::File, b, 20),
            FileEntry::new("/z", FileKind::File, a, 20),
        ];

        let heuristics = heuristics_from_rules(&[ModifierRule {
            pattern: "/etc/*".to_string(),
            modifier: Modifier::Config,
        }])
        .unwrap();

        let outcome = update_manifest(new, &old, &heuristics).unwrap();
        let manifest = outcome.manifest();
        let order: Vec<_> = manifest
            .files
            .iter()
            .map(|f| (f.version, f.name.as_str()))
            .collect();
        assert_eq!(order, vec![(10, "/z"), (20, "/etc/conf"), (20, "/y")]);
        assert_eq!(manifest.get("/etc/conf").unwrap().modifier, Modifier::Config);
        assert!(outcome.is_updated());
    }

    #[test]
    fn test_changes_sorted_by_path() {
        let table = AddressTable::new();
        let a = table.intern(DIGEST_A).unwrap();

        let mut old = manifest(10, 0);
        old.files = vec![FileEntry::new("/m", FileKind::File, a, 10)];
        let mut new = manifest(20, 10);
        new.files = vec![
            FileEntry::new("/z", FileKind::File, a, 20),
            FileEntry::new("/a", FileKind::File, a, 20),
        ];

        let summary = diff_manifests(&mut new, &old).unwrap();
        let paths: Vec<_> = summary.changes.iter().map(|c| c.to_string()).collect();
        assert_eq!(paths, vec!["A /a", "D /m", "A /z"]);
    }
}
