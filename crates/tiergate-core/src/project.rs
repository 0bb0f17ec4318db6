//! A project on disk: its root, `tiergate.toml`, and the feature boundary table.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::boundary::BoundaryTable;
use crate::config::{EngineConfig, TierPolicy, CONFIG_FILE};
use crate::error::{Result, TiergateError};
use crate::git;
use crate::tier::BuildTier;

#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: EngineConfig,
    pub boundaries: BoundaryTable,
}

impl Project {
    /// Load the project rooted at `root`.
    ///
    /// `config_path` overrides `<root>/tiergate.toml` and must exist. Without
    /// an override a missing `tiergate.toml` means all defaults. The feature
    /// boundary file is always required.
    pub fn open(root: &Path, config_path: Option<&Path>) -> Result<Self> {
        let root = root.to_path_buf();
        let config = match config_path {
            Some(path) => EngineConfig::load(&resolve(&root, path))?,
            None => {
                let default = root.join(CONFIG_FILE);
                if default.is_file() {
                    EngineConfig::load(&default)?
                } else {
                    info!(root = %root.display(), "no {CONFIG_FILE} found, using defaults");
                    EngineConfig::default()
                }
            }
        };

        let boundary_path = resolve(&root, &config.project.boundaries);
        if !boundary_path.is_file() {
            return Err(TiergateError::config(format!(
                "feature boundary file {} not found",
                boundary_path.display()
            )));
        }
        let boundaries = BoundaryTable::load(&boundary_path)?;
        debug!(
            path = %boundary_path.display(),
            features = boundaries.features().len(),
            "feature boundaries loaded"
        );

        Ok(Self {
            root,
            config,
            boundaries,
        })
    }

    pub fn from_parts(root: &Path, config: EngineConfig, boundaries: BoundaryTable) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
            boundaries,
        })
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        resolve(&self.root, path)
    }

    pub fn community_root(&self) -> PathBuf {
        self.resolve(&self.config.project.community_root)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.config.project.output_dir)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.resolve(&self.config.project.state_dir)
    }

    pub fn install_manifest(&self) -> PathBuf {
        self.resolve(&self.config.project.install_manifest)
    }

    /// Git revision of the checkout, with `-dirty` appended for uncommitted
    /// changes. Build output, state and the install manifest do not count.
    pub fn source_revision(&self) -> Option<String> {
        git::source_revision(
            &self.root,
            &[self.output_dir(), self.state_dir(), self.install_manifest()],
        )
    }

    pub fn policy(&self, tier: BuildTier) -> &TierPolicy {
        self.config.tiers.policy(tier.name())
    }

    pub fn manifest_path(&self, tier: BuildTier) -> PathBuf {
        self.resolve(&self.policy(tier).manifest)
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
