use std::fs::File;
use std::io::Read;
use std::path::Path;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::fs::{read_symlink_target, FileMetadata, FileType};
use crate::types::FileKind;

type HmacSha256 = Hmac<Sha256>;

/// digest recorded for deleted entries
pub const ALL_ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// fixed payload hashed for every directory
pub const DIRECTORY_PAYLOAD: &[u8] = b"DIRECTORY";

/// length of a hex encoded digest
pub const HASH_HEX_LEN: usize = 64;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// stat fields that key the content MAC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashStat {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

impl HashStat {
    /// derive the hashed stat view of a filesystem object.
    ///
    /// symlinks hash with mode zero; only regular files carry a size.
    pub fn from_metadata(meta: &FileMetadata) -> Self {
        let (mode, size) = match meta.file_type {
            FileType::Regular => (meta.mode, meta.size),
            FileType::Symlink => (0, 0),
            _ => (meta.mode, 0),
        };
        Self {
            mode,
            uid: meta.uid,
            gid: meta.gid,
            size,
        }
    }

    /// 40-byte little endian record: mode | uid | gid | rdev (always zero) | size
    pub fn to_record(&self) -> [u8; 40] {
        let mut record = [0u8; 40];
        record[0..8].copy_from_slice(&u64::from(self.mode).to_le_bytes());
        record[8..16].copy_from_slice(&u64::from(self.uid).to_le_bytes());
        record[16..24].copy_from_slice(&u64::from(self.gid).to_le_bytes());
        record[32..40].copy_from_slice(&self.size.to_le_bytes());
        record
    }
}

fn new_mac(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("hmac accepts keys of any length")
}

/// compute the MAC key for a stat record
///
/// the key is the hex encoded MAC of an empty message under the raw record.
/// published manifests depend on this exact construction.
pub fn compute_key(stat: &HashStat) -> String {
    let mac = new_mac(&stat.to_record());
    hex::encode(mac.finalize().into_bytes())
}

/// compute the content address digest for a stat record and payload
pub fn compute_hash(stat: &HashStat, payload: &[u8]) -> String {
    let mut hasher = AddressHasher::new(stat);
    hasher.update(payload);
    hasher.finalize()
}

/// streaming content hasher for large files
pub struct AddressHasher {
    mac: HmacSha256,
}

impl AddressHasher {
    /// create new hasher keyed by the stat record
    pub fn new(stat: &HashStat) -> Self {
        Self {
            mac: new_mac(compute_key(stat).as_bytes()),
        }
    }

    /// feed payload bytes
    pub fn update(&mut self, data: &[u8]) {
        self.mac.update(data);
    }

    /// finalize and return the lowercase hex digest
    pub fn finalize(self) -> String {
        hex::encode(self.mac.finalize().into_bytes())
    }
}

/// result of hashing one filesystem object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathHash {
    pub kind: FileKind,
    pub digest: String,
    /// payload size for regular files, zero otherwise
    pub size: u64,
}

/// hash the object at `path` without following symlinks
pub fn hash_path(path: &Path) -> Result<PathHash> {
    let meta = FileMetadata::from_path(path)?;
    let stat = HashStat::from_metadata(&meta);

    let (kind, digest) = match meta.file_type {
        FileType::Regular => (FileKind::File, hash_file_contents(path, &stat)?),
        FileType::Directory => (FileKind::Directory, compute_hash(&stat, DIRECTORY_PAYLOAD)),
        FileType::Symlink => {
            let target = read_symlink_target(path)?;
            (FileKind::Link, compute_hash(&stat, &target))
        }
        other => {
            return Err(Error::UnsupportedType {
                path: path.to_path_buf(),
                file_type: other.name(),
            })
        }
    };

    Ok(PathHash {
        kind,
        digest,
        size: stat.size,
    })
}

fn hash_file_contents(path: &Path, stat: &HashStat) -> Result<String> {
    let read_err = |source| Error::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(read_err)?;
    let mut hasher = AddressHasher::new(stat);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(read_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// check a digest string is 64 lowercase hex characters
pub fn is_valid_digest(s: &str) -> bool {
    s.len() == HASH_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
