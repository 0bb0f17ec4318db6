//! Bundler exclusion config: restricted module paths marked unresolvable so
//! any reference fails the compile step itself.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::BoundaryTable;
use crate::error::Result;
use crate::fsutil;
use crate::tier::{BuildTier, TierName};

/// Directory under the state dir holding one exclusion file per tier and platform.
pub const EXCLUSIONS_DIR: &str = "externals";

/// Environment variable pointing the compiler at the exclusion file.
pub const EXTERNALS_ENV_VAR: &str = "TIERGATE_EXTERNALS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlerExclusions {
    pub tier: TierName,
    /// Module prefixes the bundler must treat as unresolvable.
    pub externals: Vec<String>,
    /// Matching patterns, for bundlers that accept regexes.
    pub patterns: Vec<String>,
}

impl BundlerExclusions {
    /// Generated from the boundary table; empty for tiers that may use every feature.
    pub fn for_tier(table: &BoundaryTable, tier: BuildTier) -> Self {
        let mut externals = Vec::new();
        let mut patterns = Vec::new();
        for compiled in table.prohibited_for(tier) {
            externals.push(compiled.boundary.normalized_prefix().to_string());
            patterns.push(compiled.pattern.as_str().to_string());
        }
        externals.sort();
        externals.dedup();
        patterns.sort();
        patterns.dedup();

        Self {
            tier: tier.name(),
            externals,
            patterns,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.externals.is_empty()
    }

    /// `<state_dir>/externals/<tier>-<platform>.json`. Kept out of the build
    /// output so the artifact never lists the prefixes it must not contain.
    pub fn path_in(state_dir: &Path, tier: BuildTier, platform: &str) -> PathBuf {
        state_dir
            .join(EXCLUSIONS_DIR)
            .join(format!("{tier}-{platform}.json"))
    }

    /// Write the exclusion config to `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        fsutil::write_json(path, self)
    }
}
