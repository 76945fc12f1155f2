use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use crate::error::{Error, IoResultExt, Result};
use crate::fs::write_atomic;
use crate::types::{manifest_file_name, FULL_MANIFEST};

const LAST_VER: &str = "LAST_VER";
const STAGING_DIR_MODE: u32 = 0o755;
const LAST_VER_MODE: u32 = 0o644;

/// a build state directory
///
/// ```text
/// <state>/
///     image/
///         LAST_VER            last published version
///         <version>/
///             full/           whole staged tree
///             <bundle>/       per-bundle staged tree
///     www/
///         <version>/
///             Manifest.<name>
///     temp/
///         <version>/          unpublished manifests of the running build
/// ```
#[derive(Debug, Clone)]
pub struct StateDir {
    path: PathBuf,
}

impl StateDir {
    /// open an existing state directory
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// open a state directory, creating it and its top-level layout if needed
    pub fn create(path: &Path) -> Result<Self> {
        fs::create_dir_all(path.join("image")).with_path(path)?;
        fs::create_dir_all(path.join("www")).with_path(path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// root of all staged trees
    pub fn image_path(&self) -> PathBuf {
        self.path.join("image")
    }

    /// staged trees of one version
    pub fn version_image_path(&self, version: u32) -> PathBuf {
        self.image_path().join(version.to_string())
    }

    /// staged tree of one bundle
    pub fn bundle_root(&self, version: u32, bundle: &str) -> PathBuf {
        self.version_image_path(version).join(bundle)
    }

    /// staged tree of the whole image
    pub fn full_root(&self, version: u32) -> PathBuf {
        self.bundle_root(version, FULL_MANIFEST)
    }

    /// root of all published manifests
    pub fn www_path(&self) -> PathBuf {
        self.path.join("www")
    }

    /// published manifests of one version
    pub fn version_output_path(&self, version: u32) -> PathBuf {
        self.www_path().join(version.to_string())
    }

    /// path of a published manifest
    pub fn manifest_path(&self, version: u32, name: &str) -> PathBuf {
        self.version_output_path(version).join(manifest_file_name(name))
    }

    /// scratch space of the running build
    pub fn temp_path(&self) -> PathBuf {
        self.path.join("temp")
    }

    /// unpublished manifest set of a version, renamed to its output path on publish
    pub fn staged_output_path(&self, version: u32) -> PathBuf {
        self.temp_path().join(version.to_string())
    }

    pub fn last_version_path(&self) -> PathBuf {
        self.image_path().join(LAST_VER)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.path.join(".lock")
    }

    /// recreate an empty temp directory
    pub fn init_build_env(&self) -> Result<()> {
        let temp = self.temp_path();
        match fs::remove_dir_all(&temp) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io { path: temp, source: e }),
        }
        fs::create_dir_all(&temp).with_path(&temp)?;
        Ok(())
    }

    /// create empty staging trees for a version and seed LAST_VER
    pub fn init_build_dirs(&self, version: u32, bundles: &[&str]) -> Result<()> {
        let image = self.image_path();
        fs::create_dir_all(&image).with_path(&image)?;

        if !self.last_version_path().exists() {
            self.write_last_version(0)?;
        }

        let version_dir = self.version_image_path(version);
        for bundle in bundles.iter().copied().chain([FULL_MANIFEST]) {
            let dir = version_dir.join(bundle);
            fs::create_dir_all(&dir).with_path(&dir)?;
            fs::set_permissions(&dir, fs::Permissions::from_mode(STAGING_DIR_MODE))
                .with_path(&dir)?;
        }
        fs::set_permissions(&version_dir, fs::Permissions::from_mode(STAGING_DIR_MODE))
            .with_path(&version_dir)?;

        debug!(version, dir = %version_dir.display(), "initialized staging dirs");
        Ok(())
    }

    /// read the last published version
    pub fn read_last_version(&self) -> Result<u32> {
        let path = self.last_version_path();
        let content = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(path.clone())
            } else {
                Error::Io {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;

        content
            .trim()
            .parse()
            .map_err(|_| Error::InvalidLastVersion(path))
    }

    /// record the last published version
    pub fn write_last_version(&self, version: u32) -> Result<()> {
        let path = self.last_version_path();
        write_atomic(&path, format!("{}\n", version).as_bytes(), LAST_VER_MODE)
    }

    /// acquire exclusive lock on the state directory
    /// returns a guard that releases the lock on drop
    pub fn lock(&self) -> Result<StateLock> {
        let lock_path = self.lock_path();
        let file = File::create(&lock_path).with_path(&lock_path)?;

        let flock = Flock::lock(file, FlockArg::LockExclusiveNonblock)
            .map_err(|_| Error::LockContention)?;

        Ok(StateLock { _flock: flock })
    }
}

/// guard that holds the state lock until dropped
pub struct StateLock {
    _flock: Flock<File>,
}
