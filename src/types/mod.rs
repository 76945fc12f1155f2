mod entry;
mod manifest;
mod metadata;

pub use entry::{EntryStatus, FileEntry, FileKind, Modifier};
pub use manifest::{
    manifest_file_name, unix_timestamp, Manifest, ManifestHeader, FULL_MANIFEST,
    MANIFEST_FILE_PREFIX, MOM_MANIFEST,
};
pub use metadata::{ChangeKind, DiffEntry};
