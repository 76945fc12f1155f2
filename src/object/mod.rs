pub mod manifest;

pub use manifest::{
    format_manifest, manifest_address, manifest_name_from_path, pack_manifest, parse_manifest,
    read_manifest_file, write_manifest_file,
};
