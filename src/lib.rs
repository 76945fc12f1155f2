//! swupd - versioned manifest generation for image-based OS updates
//!
//! every build of an OS image produces one manifest per bundle, a `full`
//! manifest of the whole tree, and a manifest of manifests (`MoM`) listing
//! every bundle's manifest. clients compare manifests of two versions to
//! fetch only what changed.
//!
//! # Core concepts
//!
//! - **Address**: interned content address of a filesystem object
//! - **Manifest**: versioned list of file entries, one per path
//! - **Bundle**: a named subset of the image with its own manifest
//! - **Version**: each entry records the version its content last changed in
//!
//! # Hash format
//!
//! key = hex(HMAC-SHA256(key = mode | uid | gid | 0 | size, message = ""))
//! address = hex(HMAC-SHA256(key = key, message = payload))
//!
//! each record field is 8 bytes little-endian. the payload is the file
//! content, the symlink target, or `DIRECTORY`.
//!
//! # Example usage
//!
//! ```no_run
//! use swupd::{ops, AddressTable, BuildConfig};
//! use std::path::Path;
//!
//! let config = BuildConfig::load(Path::new("/etc/swupd/build.toml")).unwrap();
//! let table = AddressTable::new();
//!
//! let report = ops::create_manifests(&config, 20, &table).unwrap();
//! println!("updated bundles: {:?}", report.updated());
//! ```

mod address;
mod config;
mod error;
mod hash;
mod object;
mod state;

pub mod fs;
pub mod ops;
pub mod types;

pub use address::{Address, AddressTable};
pub use config::{BuildConfig, BundleConfig, FailurePolicy, ModifierRule};
pub use error::{Error, Result};
pub use hash::{
    compute_hash, compute_key, hash_path, is_valid_digest, AddressHasher, HashStat, PathHash,
    ALL_ZERO_HASH, DIRECTORY_PAYLOAD,
};
pub use object::{
    format_manifest, manifest_address, manifest_name_from_path, pack_manifest, parse_manifest,
    read_manifest_file, write_manifest_file,
};
pub use state::{StateDir, StateLock};
pub use types::{
    ChangeKind, DiffEntry, EntryStatus, FileEntry, FileKind, Manifest, ManifestHeader, Modifier,
};
