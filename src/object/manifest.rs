use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::address::{Address, AddressTable};
use crate::error::{Error, IoResultExt, Result};
use crate::fs::write_atomic;
use crate::hash::hash_path;
use crate::types::{FileEntry, Manifest, ManifestHeader, MANIFEST_FILE_PREFIX};

const MAGIC: &str = "MANIFEST";
const MANIFEST_MODE: u32 = 0o644;

/// serialize a manifest to its textual form
///
/// ```text
/// MANIFEST\t<format>
/// version:\t<version>
/// previous:\t<previous>
/// filecount:\t<count>
/// timestamp:\t<unix seconds>
/// contentsize:\t<bytes>
/// includes:\t<bundle>
///
/// <flags>\t<address>\t<version>\t<name>
/// ```
pub fn format_manifest(manifest: &Manifest, table: &AddressTable) -> Result<String> {
    let h = &manifest.header;
    let mut out = String::new();
    out.push_str(&format!("{}\t{}\n", MAGIC, h.format));
    out.push_str(&format!("version:\t{}\n", h.version));
    out.push_str(&format!("previous:\t{}\n", h.previous));
    out.push_str(&format!("filecount:\t{}\n", manifest.files.len()));
    out.push_str(&format!("timestamp:\t{}\n", h.timestamp));
    out.push_str(&format!("contentsize:\t{}\n", h.content_size));
    for include in &manifest.includes {
        check_field(include)?;
        out.push_str(&format!("includes:\t{}\n", include));
    }
    out.push('\n');

    for file in &manifest.files {
        check_field(&file.name)?;
        let digest = table.resolve(file.address)?;
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\n",
            file.flags(),
            digest,
            file.version,
            file.name
        ));
    }

    Ok(out)
}

fn check_field(value: &str) -> Result<()> {
    if value.is_empty() || value.contains(['\t', '\n', '\r']) {
        return Err(Error::InvalidEntryName(value.to_string()));
    }
    Ok(())
}

/// parse the textual form of manifest `name`
pub fn parse_manifest(name: &str, text: &str, table: &AddressTable) -> Result<Manifest> {
    let err = |line: usize, message: String| Error::ManifestParse {
        manifest: name.to_string(),
        line,
        message,
    };

    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l));

    let format = match lines.next() {
        Some((n, line)) => {
            let value = line
                .strip_prefix(MAGIC)
                .and_then(|rest| rest.strip_prefix('\t'))
                .ok_or_else(|| err(n, "missing MANIFEST line".to_string()))?;
            parse_num::<u32>(value).map_err(|m| err(n, m))?
        }
        None => return Err(err(1, "empty manifest".to_string())),
    };

    let mut version = None;
    let mut previous = None;
    let mut timestamp = None;
    let mut content_size = 0;
    let mut file_count = None;
    let mut includes = Vec::new();
    let mut header_end = 1;

    for (n, line) in lines.by_ref() {
        header_end = n;
        if line.is_empty() {
            break;
        }
        let (key, value) = line
            .split_once(":\t")
            .ok_or_else(|| err(n, format!("malformed header line {:?}", line)))?;
        match key {
            "version" => version = Some(parse_num::<u32>(value).map_err(|m| err(n, m))?),
            "previous" => previous = Some(parse_num::<u32>(value).map_err(|m| err(n, m))?),
            "timestamp" => timestamp = Some(parse_num::<i64>(value).map_err(|m| err(n, m))?),
            "contentsize" => content_size = parse_num::<u64>(value).map_err(|m| err(n, m))?,
            "filecount" => file_count = Some(parse_num::<usize>(value).map_err(|m| err(n, m))?),
            "includes" => includes.push(value.to_string()),
            other => debug!(manifest = name, key = other, "ignoring unknown header field"),
        }
    }

    let missing = |field: &str| err(header_end, format!("missing header field {}", field));
    let header = ManifestHeader {
        format,
        version: version.ok_or_else(|| missing("version"))?,
        previous: previous.ok_or_else(|| missing("previous"))?,
        timestamp: timestamp.ok_or_else(|| missing("timestamp"))?,
        content_size,
    };

    let mut manifest = Manifest::new(name, header);
    manifest.includes = includes;

    let mut seen = HashSet::new();
    for (n, line) in lines {
        if line.is_empty() {
            continue;
        }
        let entry = parse_entry(line, table).map_err(|m| err(n, m))?;
        if !seen.insert(entry.name.clone()) {
            return Err(err(n, format!("duplicate entry {}", entry.name)));
        }
        manifest.files.push(entry);
    }

    if let Some(expected) = file_count {
        if expected != manifest.files.len() {
            return Err(err(
                header_end,
                format!(
                    "filecount {} does not match {} entries",
                    expected,
                    manifest.files.len()
                ),
            ));
        }
    }

    Ok(manifest)
}

fn parse_entry(line: &str, table: &AddressTable) -> std::result::Result<FileEntry, String> {
    let mut fields = line.splitn(4, '\t');
    let (flags, digest, version, name) =
        match (fields.next(), fields.next(), fields.next(), fields.next()) {
            (Some(f), Some(d), Some(v), Some(n)) => (f, d, v, n),
            _ => return Err(format!("malformed entry {:?}", line)),
        };

    let (kind, status, modifier, rename) =
        FileEntry::parse_flags(flags).ok_or_else(|| format!("invalid flags {:?}", flags))?;
    let address: Address = table.intern(digest).map_err(|e| e.to_string())?;
    let version = parse_num::<u32>(version)?;
    if name.is_empty() {
        return Err("empty entry name".to_string());
    }

    Ok(FileEntry {
        name: name.to_string(),
        kind,
        address,
        version,
        status,
        modifier,
        rename,
    })
}

fn parse_num<T: std::str::FromStr>(value: &str) -> std::result::Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("invalid number {:?}", value))
}

/// manifest name encoded in a `Manifest.<name>` path
pub fn manifest_name_from_path(path: &Path) -> Option<&str> {
    path.file_name()?
        .to_str()?
        .strip_prefix(MANIFEST_FILE_PREFIX)
        .filter(|name| !name.is_empty())
}

/// read a manifest from a `Manifest.<name>` file
pub fn read_manifest_file(path: &Path, table: &AddressTable) -> Result<Manifest> {
    let text = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path.to_path_buf())
        } else {
            Error::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    let name = manifest_name_from_path(path)
        .ok_or_else(|| Error::InvalidEntryName(path.display().to_string()))?;
    parse_manifest(name, &text, table)
}

/// write a manifest file
///
/// atomic: temp file in the target directory -> fsync -> rename.
/// the file is left with mode 0644 so its own content address is stable.
pub fn write_manifest_file(manifest: &Manifest, table: &AddressTable, path: &Path) -> Result<()> {
    let text = format_manifest(manifest, table)?;
    write_atomic(path, text.as_bytes(), MANIFEST_MODE)?;
    debug!(
        manifest = %manifest.name,
        version = manifest.header.version,
        entries = manifest.files.len(),
        path = %path.display(),
        "wrote manifest"
    );
    Ok(())
}

/// content address of a persisted manifest file
pub fn manifest_address(path: &Path, table: &AddressTable) -> Result<Address> {
    let hashed = hash_path(path)?;
    Ok(table.intern_unchecked(&hashed.digest))
}

/// write a zstd compressed transport copy next to a manifest file
pub fn pack_manifest(path: &Path) -> Result<PathBuf> {
    let raw = fs::read(path).with_path(path)?;
    let compressed = zstd::encode_all(&raw[..], 3).with_path(path)?;

    let mut packed = path.as_os_str().to_owned();
    packed.push(".zst");
    let packed = PathBuf::from(packed);
    write_atomic(&packed, &compressed, MANIFEST_MODE)?;
    Ok(packed)
}
