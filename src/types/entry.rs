use serde::{Deserialize, Serialize};

use crate::address::Address;

/// kind of object a manifest entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    File,
    Directory,
    Link,
    /// a bundle manifest, only found in the MoM
    Manifest,
}

impl FileKind {
    pub fn flag(&self) -> char {
        match self {
            FileKind::File => 'F',
            FileKind::Directory => 'D',
            FileKind::Link => 'L',
            FileKind::Manifest => 'M',
        }
    }

    pub fn from_flag(c: char) -> Option<Self> {
        match c {
            'F' => Some(FileKind::File),
            'D' => Some(FileKind::Directory),
            'L' => Some(FileKind::Link),
            'M' => Some(FileKind::Manifest),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FileKind::File => "file",
            FileKind::Directory => "directory",
            FileKind::Link => "link",
            FileKind::Manifest => "manifest",
        }
    }
}

/// presence of an entry at this version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryStatus {
    #[default]
    Present,
    Deleted,
}

impl EntryStatus {
    pub fn flag(&self) -> char {
        match self {
            EntryStatus::Present => '.',
            EntryStatus::Deleted => 'd',
        }
    }

    pub fn from_flag(c: char) -> Option<Self> {
        match c {
            '.' => Some(EntryStatus::Present),
            'd' => Some(EntryStatus::Deleted),
            _ => None,
        }
    }
}

/// client-side handling hint set by heuristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    #[default]
    None,
    Config,
    State,
    Boot,
}

impl Modifier {
    pub fn flag(&self) -> char {
        match self {
            Modifier::None => '.',
            Modifier::Config => 'C',
            Modifier::State => 's',
            Modifier::Boot => 'b',
        }
    }

    pub fn from_flag(c: char) -> Option<Self> {
        match c {
            '.' => Some(Modifier::None),
            'C' => Some(Modifier::Config),
            's' => Some(Modifier::State),
            'b' => Some(Modifier::Boot),
            _ => None,
        }
    }
}

/// one record of a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// path relative to the staging root, rooted at "/"
    pub name: String,
    pub kind: FileKind,
    pub address: Address,
    /// version at which this entry last changed
    pub version: u32,
    pub status: EntryStatus,
    pub modifier: Modifier,
    /// marked as one side of a rename pair
    ///
    /// the diff never sets this; it is left to heuristics that pair deleted
    /// and added entries, and is written as the `r` flag.
    pub rename: bool,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, kind: FileKind, address: Address, version: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            address,
            version,
            status: EntryStatus::Present,
            modifier: Modifier::None,
            rename: false,
        }
    }

    /// a deletion record: zero address, deleted flag set
    pub fn deleted(name: impl Into<String>, kind: FileKind, version: u32) -> Self {
        Self {
            status: EntryStatus::Deleted,
            ..Self::new(name, kind, Address::ZERO, version)
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status == EntryStatus::Deleted
    }

    /// four character flag field: kind, status, modifier, rename
    pub fn flags(&self) -> String {
        let mut flags = String::with_capacity(4);
        flags.push(self.kind.flag());
        flags.push(self.status.flag());
        flags.push(self.modifier.flag());
        flags.push(if self.rename { 'r' } else { '.' });
        flags
    }

    /// parse a flag field into (kind, status, modifier, rename)
    pub fn parse_flags(flags: &str) -> Option<(FileKind, EntryStatus, Modifier, bool)> {
        let mut chars = flags.chars();
        let kind = FileKind::from_flag(chars.next()?)?;
        let status = EntryStatus::from_flag(chars.next()?)?;
        let modifier = Modifier::from_flag(chars.next()?)?;
        let rename = match chars.next()? {
            'r' => true,
            '.' => false,
            _ => return None,
        };
        if chars.next().is_some() {
            return None;
        }
        Some((kind, status, modifier, rename))
    }
}
