pub mod read;
pub mod write;

pub use read::{read_symlink_target, FileMetadata, FileType};
pub use write::{fsync_dir, write_atomic};
