//! build orchestration: one manifest set per version

use std::fs;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::address::AddressTable;
use crate::config::{BuildConfig, BundleConfig, FailurePolicy};
use crate::error::{Error, IoResultExt, Result};
use crate::fs::fsync_dir;
use crate::object::{manifest_address, pack_manifest, read_manifest_file, write_manifest_file};
use crate::ops::diff::{diff_manifests, update_manifest, DiffSummary, UpdateOutcome};
use crate::ops::heuristics::{apply_heuristics, heuristics_from_rules, Heuristic};
use crate::ops::scan::scan;
use crate::state::StateDir;
use crate::types::{
    unix_timestamp, FileEntry, FileKind, Manifest, ManifestHeader, FULL_MANIFEST, MOM_MANIFEST,
};

/// how one bundle fared in a build
#[derive(Debug)]
pub enum BundleStatus {
    /// a new manifest was published at the build version
    Updated { summary: DiffSummary },
    /// nothing changed; the bundle stays at `version`
    Unchanged { version: u32 },
    /// scanning or diffing failed and the bundle was skipped
    Failed(Error),
}

#[derive(Debug)]
pub struct BundleReport {
    pub name: String,
    pub status: BundleStatus,
}

/// summary of a finished build
#[derive(Debug)]
pub struct BuildReport {
    pub version: u32,
    pub previous: u32,
    pub timestamp: i64,
    pub bundles: Vec<BundleReport>,
    pub full: DiffSummary,
    pub mom: DiffSummary,
}

impl BuildReport {
    fn names_where(&self, pred: impl Fn(&BundleStatus) -> bool) -> Vec<&str> {
        self.bundles
            .iter()
            .filter(|b| pred(&b.status))
            .map(|b| b.name.as_str())
            .collect()
    }

    pub fn updated(&self) -> Vec<&str> {
        self.names_where(|s| matches!(s, BundleStatus::Updated { .. }))
    }

    pub fn unchanged(&self) -> Vec<&str> {
        self.names_where(|s| matches!(s, BundleStatus::Unchanged { .. }))
    }

    pub fn failed(&self) -> Vec<&str> {
        self.names_where(|s| matches!(s, BundleStatus::Failed(_)))
    }

    pub fn bundle(&self, name: &str) -> Option<&BundleStatus> {
        self.bundles.iter().find(|b| b.name == name).map(|b| &b.status)
    }
}

struct BuildContext<'a> {
    state: &'a StateDir,
    table: &'a AddressTable,
    header: ManifestHeader,
    old_mom: &'a Manifest,
    heuristics: &'a [Box<dyn Heuristic>],
}

/// build and publish the manifests of `version`
///
/// reads the last published version from the state directory, diffs every
/// bundle's staged tree against its previous manifest, and publishes changed
/// bundle manifests plus `full` and `MoM` to `www/<version>/`. nothing is
/// published unless the whole build succeeds.
pub fn create_manifests(
    config: &BuildConfig,
    version: u32,
    table: &AddressTable,
) -> Result<BuildReport> {
    config.validate()?;
    let state = StateDir::open(&config.state_dir)?;
    let _lock = state.lock()?;

    state.init_build_env()?;
    let last = state.read_last_version()?;
    if version <= last {
        return Err(Error::InvalidVersion { version, last });
    }
    let out = state.version_output_path(version);
    if out.exists() {
        return Err(Error::OutputExists(out));
    }

    let timestamp = unix_timestamp();
    let header = ManifestHeader::new(config.format, version, last, timestamp);
    let heuristics = heuristics_from_rules(&config.modifiers)?;
    let old_mom = load_baseline(&state, table, last, MOM_MANIFEST, config.format)?;

    let ctx = BuildContext {
        state: &state,
        table,
        header,
        old_mom: &old_mom,
        heuristics: &heuristics,
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs)
        .build()
        .map_err(|e| Error::ThreadPool(e.to_string()))?;

    info!(version, previous = last, bundles = config.bundles.len(), "building manifests");

    let (full, bundles) = pool.install(|| {
        rayon::join(
            || build_full(&ctx, last, config.format),
            || process_bundles(&ctx, config),
        )
    });
    let (full, full_summary) = full?;
    let bundles = bundles?;

    // stage the whole version set in temp/<version>/ before publishing
    let staging = state.staged_output_path(version);
    fs::create_dir_all(&staging).with_path(&staging)?;
    let mut staged = Vec::new();
    let mut reports = Vec::new();
    let mut mom = Manifest::new(MOM_MANIFEST, ctx.header.clone());

    for (bundle, result) in bundles {
        let status = match result {
            Ok(UpdateOutcome::Updated { manifest, summary }) => {
                let path = staging.join(manifest.file_name());
                write_manifest_file(&manifest, table, &path)?;
                let address = manifest_address(&path, table)?;
                mom.files.push(FileEntry::new(
                    manifest.name.clone(),
                    FileKind::Manifest,
                    address,
                    version,
                ));
                staged.push(manifest.file_name());
                BundleStatus::Updated { summary }
            }
            Ok(UpdateOutcome::Unchanged { manifest }) => {
                carry_mom_entry(&mut mom, &old_mom, &bundle.name);
                BundleStatus::Unchanged {
                    version: manifest.header.version,
                }
            }
            Err(e) => {
                warn!(bundle = %bundle.name, error = %e, "skipping failed bundle");
                carry_mom_entry(&mut mom, &old_mom, &bundle.name);
                BundleStatus::Failed(e)
            }
        };
        reports.push(BundleReport {
            name: bundle.name.clone(),
            status,
        });
    }

    let mom_summary = diff_manifests(&mut mom, &old_mom)?;
    mom.sort_by_version_name();

    for manifest in [&full, &mom] {
        write_manifest_file(manifest, table, &staging.join(manifest.file_name()))?;
        staged.push(manifest.file_name());
    }

    publish(&state, version, &staged, config.compress)?;
    state.write_last_version(version)?;

    let report = BuildReport {
        version,
        previous: last,
        timestamp,
        bundles: reports,
        full: full_summary,
        mom: mom_summary,
    };
    info!(
        version,
        updated = report.updated().len(),
        unchanged = report.unchanged().len(),
        failed = report.failed().len(),
        "build complete"
    );
    Ok(report)
}

/// read the published manifest `name` of version `last`
///
/// a missing file is only acceptable before the first release.
fn load_baseline(
    state: &StateDir,
    table: &AddressTable,
    last: u32,
    name: &str,
    format: u32,
) -> Result<Manifest> {
    match read_manifest_file(&state.manifest_path(last, name), table) {
        Ok(manifest) => Ok(manifest),
        Err(Error::NotFound(_)) if last == 0 => Ok(Manifest::bootstrap(name, format)),
        Err(Error::NotFound(path)) => Err(Error::MissingBaseline {
            manifest: name.to_string(),
            path,
        }),
        Err(e) => Err(e),
    }
}

/// previous manifest of a bundle, found through the previous MoM
fn load_bundle_baseline(ctx: &BuildContext<'_>, name: &str) -> Result<Manifest> {
    match ctx.old_mom.get(name) {
        Some(entry) if !entry.is_deleted() => {
            let path = ctx.state.manifest_path(entry.version, name);
            read_manifest_file(&path, ctx.table).map_err(|e| match e {
                Error::NotFound(path) => Error::MissingBaseline {
                    manifest: name.to_string(),
                    path,
                },
                e => e,
            })
        }
        // bundle is new in this build
        _ => Ok(Manifest::bootstrap(name, ctx.header.format)),
    }
}

fn process_bundle(ctx: &BuildContext<'_>, bundle: &BundleConfig) -> Result<UpdateOutcome> {
    let old = load_bundle_baseline(ctx, &bundle.name)?;

    let mut new = Manifest::new(bundle.name.clone(), ctx.header.clone())
        .with_includes(bundle.includes.iter().cloned());
    let root = ctx.state.bundle_root(ctx.header.version, &bundle.name);
    scan(&mut new, &root, ctx.table)?;

    update_manifest(new, &old, ctx.heuristics)
}

type BundleResult<'a> = (&'a BundleConfig, Result<UpdateOutcome>);

fn process_bundles<'a>(
    ctx: &BuildContext<'_>,
    config: &'a BuildConfig,
) -> Result<Vec<BundleResult<'a>>> {
    match config.on_bundle_error {
        // collecting into a Result stops scheduling on the first error
        FailurePolicy::Abort => config
            .bundles
            .par_iter()
            .map(|bundle| process_bundle(ctx, bundle).map(|outcome| (bundle, Ok(outcome))))
            .collect(),
        FailurePolicy::Skip => Ok(config
            .bundles
            .par_iter()
            .map(|bundle| (bundle, process_bundle(ctx, bundle)))
            .collect()),
    }
}

fn build_full(ctx: &BuildContext<'_>, last: u32, format: u32) -> Result<(Manifest, DiffSummary)> {
    let old = load_baseline(ctx.state, ctx.table, last, FULL_MANIFEST, format)?;

    let mut full = Manifest::new(FULL_MANIFEST, ctx.header.clone());
    scan(&mut full, &ctx.state.full_root(ctx.header.version), ctx.table)?;

    let summary = diff_manifests(&mut full, &old)?;
    apply_heuristics(&mut full, ctx.heuristics);
    full.sort_by_version_name();
    Ok((full, summary))
}

fn carry_mom_entry(mom: &mut Manifest, old_mom: &Manifest, name: &str) {
    if let Some(entry) = old_mom.get(name).filter(|e| !e.is_deleted()) {
        mom.files.push(entry.clone());
    }
}

/// publish the staged version set with a single directory rename
///
/// compressed copies are written inside the staging directory first, so a
/// failure at any point leaves `www/` without the version.
fn publish(state: &StateDir, version: u32, staged: &[String], compress: bool) -> Result<()> {
    let staging = state.staged_output_path(version);
    if compress {
        for file_name in staged {
            pack_manifest(&staging.join(file_name))?;
        }
    }
    fsync_dir(&staging)?;

    let www = state.www_path();
    fs::create_dir_all(&www).with_path(&www)?;
    let out = state.version_output_path(version);
    fs::rename(&staging, &out).with_path(&out)?;
    fsync_dir(&www)?;

    for file_name in staged {
        info!(path = %out.join(file_name).display(), "published manifest");
    }
    Ok(())
}
