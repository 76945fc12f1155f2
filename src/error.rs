use std::path::PathBuf;

/// error type for manifest operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is an unsupported file type ({file_type})")]
    UnsupportedType {
        path: PathBuf,
        file_type: &'static str,
    },

    #[error("not found: {0}")]
    NotFound(PathBuf),

    #[error("type changes not supported in manifest {manifest}: {}", paths.join(", "))]
    UnsupportedTypeChange {
        manifest: String,
        paths: Vec<String>,
    },

    #[error("missing baseline for manifest {manifest} at {path}")]
    MissingBaseline { manifest: String, path: PathBuf },

    #[error("malformed manifest {manifest} at line {line}: {message}")]
    ManifestParse {
        manifest: String,
        line: usize,
        message: String,
    },

    #[error("invalid hash hex: {0}")]
    InvalidHashHex(String),

    #[error("address {0} is not in this table")]
    UnknownAddress(u32),

    #[error("invalid entry name: {0:?}")]
    InvalidEntryName(String),

    #[error("version {version} must be greater than last version {last}")]
    InvalidVersion { version: u32, last: u32 },

    #[error("output for this version already exists: {0}")]
    OutputExists(PathBuf),

    #[error("invalid last version file: {0}")]
    InvalidLastVersion(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("lock contention on state directory")]
    LockContention,

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
