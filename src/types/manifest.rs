use std::collections::HashMap;

use crate::types::FileEntry;

/// name of the aggregate manifest covering the whole image
pub const FULL_MANIFEST: &str = "full";

/// name of the manifest of manifests
pub const MOM_MANIFEST: &str = "MoM";

/// file name prefix of persisted manifests
pub const MANIFEST_FILE_PREFIX: &str = "Manifest.";

/// manifest header fields
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestHeader {
    /// on-disk schema number
    pub format: u32,
    /// version this manifest was built for
    pub version: u32,
    /// version this manifest was diffed against
    pub previous: u32,
    /// unix timestamp (seconds since epoch)
    pub timestamp: i64,
    /// total payload size of regular files
    pub content_size: u64,
}

impl ManifestHeader {
    pub fn new(format: u32, version: u32, previous: u32, timestamp: i64) -> Self {
        Self {
            format,
            version,
            previous,
            timestamp,
            content_size: 0,
        }
    }
}

/// current unix time in seconds
pub fn unix_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// a versioned list of file records for one bundle, `full` or `MoM`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub header: ManifestHeader,
    pub name: String,
    /// bundles this bundle includes
    pub includes: Vec<String>,
    pub files: Vec<FileEntry>,
}

impl Manifest {
    pub fn new(name: impl Into<String>, header: ManifestHeader) -> Self {
        Self {
            header,
            name: name.into(),
            includes: Vec::new(),
            files: Vec::new(),
        }
    }

    /// the empty version 0 manifest a first build is diffed against
    pub fn bootstrap(name: impl Into<String>, format: u32) -> Self {
        Self::new(name, ManifestHeader::new(format, 0, 0, 0))
    }

    pub fn with_includes<I, S>(mut self, includes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.includes = includes.into_iter().map(Into::into).collect();
        self
    }

    /// file name this manifest is persisted under
    pub fn file_name(&self) -> String {
        manifest_file_name(&self.name)
    }

    pub fn is_aggregate(&self) -> bool {
        self.name == FULL_MANIFEST || self.name == MOM_MANIFEST
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// find an entry by name
    pub fn get(&self, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.name == name)
    }

    /// entries keyed by name
    pub fn index(&self) -> HashMap<&str, &FileEntry> {
        self.files.iter().map(|f| (f.name.as_str(), f)).collect()
    }

    /// entries that are not deletion records
    pub fn present_files(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.iter().filter(|f| !f.is_deleted())
    }

    /// canonical order: version ascending, then name
    pub fn sort_by_version_name(&mut self) {
        self.files
            .sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.name.cmp(&b.name)));
    }
}

/// `Manifest.<name>`
pub fn manifest_file_name(name: &str) -> String {
    format!("{}{}", MANIFEST_FILE_PREFIX, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::types::FileKind;

    fn entry(name: &str, version: u32) -> FileEntry {
        FileEntry::new(name, FileKind::File, Address::ZERO, version)
    }

    #[test]
    fn test_sort_by_version_then_name() {
        let mut m = Manifest::new("os-core", ManifestHeader::new(1, 30, 20, 0));
        m.files = vec![
            entry("/c", 20),
            entry("/b", 30),
            entry("/a", 30),
            entry("/z", 10),
        ];
        m.sort_by_version_name();

        let order: Vec<_> = m.files.iter().map(|f| (f.version, f.name.as_str())).collect();
        assert_eq!(order, vec![(10, "/z"), (20, "/c"), (30, "/a"), (30, "/b")]);
    }

    #[test]
    fn test_bootstrap_is_empty_version_zero() {
        let m = Manifest::bootstrap("editors", 3);
        assert_eq!(m.header.version, 0);
        assert_eq!(m.header.format, 3);
        assert!(m.is_empty());
        assert!(!m.is_aggregate());
    }

    #[test]
    fn test_file_name() {
        let m = Manifest::bootstrap(MOM_MANIFEST, 1);
        assert_eq!(m.file_name(), "Manifest.MoM");
        assert!(m.is_aggregate());
    }

    #[test]
    fn test_lookup_and_present() {
        let mut m = Manifest::bootstrap("b", 1);
        m.files.push(entry("/a", 1));
        m.files.push(FileEntry::deleted("/gone", FileKind::File, 1));

        assert!(m.get("/a").is_some());
        assert!(m.get("/missing").is_none());
        assert_eq!(m.index().len(), 2);
        assert_eq!(m.present_files().count(), 1);
    }
}
