use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};
use crate::types::{Modifier, FULL_MANIFEST, MOM_MANIFEST};

/// build settings, usually read from a TOML file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// root of the build state (image/, www/, temp/)
    pub state_dir: PathBuf,
    /// manifest format number
    pub format: u32,
    /// worker threads for bundle processing, 0 for one per cpu
    #[serde(default)]
    pub jobs: usize,
    #[serde(default)]
    pub on_bundle_error: FailurePolicy,
    /// also write zstd compressed copies of every manifest
    #[serde(default)]
    pub compress: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bundles: Vec<BundleConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<ModifierRule>,
}

/// what to do when one bundle fails to scan or diff
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// fail the whole build
    #[default]
    Abort,
    /// keep the bundle at its previous manifest and go on
    Skip,
}

/// one bundle of the image
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<String>,
}

impl BundleConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            includes: vec![],
        }
    }

    pub fn with_includes<I, S>(mut self, includes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.includes = includes.into_iter().map(Into::into).collect();
        self
    }
}

/// glob rule for the path modifier heuristic
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifierRule {
    pub pattern: String,
    pub modifier: Modifier,
}

impl BuildConfig {
    pub fn new(state_dir: impl Into<PathBuf>, format: u32) -> Self {
        Self {
            state_dir: state_dir.into(),
            format,
            jobs: 0,
            on_bundle_error: FailurePolicy::Abort,
            compress: false,
            bundles: vec![],
            modifiers: vec![],
        }
    }

    pub fn with_bundle(mut self, bundle: BundleConfig) -> Self {
        self.bundles.push(bundle);
        self
    }

    /// load and validate config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: BuildConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }

    /// bundle names in declaration order
    pub fn bundle_names(&self) -> Vec<&str> {
        self.bundles.iter().map(|b| b.name.as_str()).collect()
    }

    /// check bundle names and include references
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for bundle in &self.bundles {
            let name = bundle.name.as_str();
            if name.is_empty()
                || name.contains(['/', '\t', '\n'])
                || name == "."
                || name == ".."
            {
                return Err(Error::InvalidConfig(format!("invalid bundle name {:?}", name)));
            }
            if name == FULL_MANIFEST || name == MOM_MANIFEST {
                return Err(Error::InvalidConfig(format!("bundle name {} is reserved", name)));
            }
            if !names.insert(name) {
                return Err(Error::InvalidConfig(format!("duplicate bundle {}", name)));
            }
        }

        for bundle in &self.bundles {
            for include in &bundle.includes {
                if include == &bundle.name {
                    return Err(Error::InvalidConfig(format!(
                        "bundle {} includes itself",
                        bundle.name
                    )));
                }
                if !names.contains(include.as_str()) {
                    return Err(Error::InvalidConfig(format!(
                        "bundle {} includes unknown bundle {}",
                        bundle.name, include
                    )));
                }
            }
        }

        Ok(())
    }
}
