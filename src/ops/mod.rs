//! high-level manifest operations

mod create;
mod diff;
mod heuristics;
mod scan;

pub use create::{create_manifests, BuildReport, BundleReport, BundleStatus};
pub use diff::{detect_type_changes, diff_manifests, update_manifest, DiffSummary, UpdateOutcome};
pub use heuristics::{apply_heuristics, heuristics_from_rules, Heuristic, PathModifiers};
pub use scan::scan;
