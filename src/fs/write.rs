use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::error::{IoResultExt, Result};

/// write a file atomically
///
/// temp file in the target directory -> fsync -> rename -> fsync dir.
/// the temp file is removed again if any step before the rename fails.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir).with_path(dir)?;

    let tmp_path = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
    let written = write_synced(&tmp_path, contents, mode)
        .and_then(|()| fs::rename(&tmp_path, path).with_path(path));
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fsync_dir(dir)
}

fn write_synced(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let mut file = File::create(path).with_path(path)?;
    file.write_all(contents).with_path(path)?;
    file.set_permissions(fs::Permissions::from_mode(mode))
        .with_path(path)?;
    file.sync_all().with_path(path)
}

/// fsync a directory
pub fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path).with_path(path)?;
    dir.sync_all().with_path(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_write_atomic_replaces_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("target");
        fs::write(&path, "old contents").unwrap();

        write_atomic(&path, b"new", 0o640).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o640);
        assert_eq!(entries(dir.path()), vec!["target"]);
    }

    #[test]
    fn test_write_atomic_creates_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/target");

        write_atomic(&path, b"x", 0o644).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"x");
    }

    #[test]
    fn test_failed_rename_removes_temp_file() {
        let dir = tempdir().unwrap();
        // a non-empty directory cannot be replaced by a file
        let path = dir.path().join("target");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupant"), "x").unwrap();

        assert!(write_atomic(&path, b"new", 0o644).is_err());
        assert_eq!(entries(dir.path()), vec!["target"]);
        assert_eq!(entries(&path), vec!["occupant"]);
    }
}
