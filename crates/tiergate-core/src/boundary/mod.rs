//! Feature boundaries: the static table that maps restricted features to the
//! module paths implementing them, and the violations found when a tier's
//! code reaches across that line.
//!
//! Enforcement happens at three independent checkpoints:
//! 1. [`BoundaryScanner::scan_sources`] before the build,
//! 2. [`BundlerExclusions`] handed to the external bundler,
//! 3. [`BoundaryScanner::scan_artifact`] on the compiled output.

pub mod exclusions;
pub mod scan;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TiergateError};
use crate::tier::{BuildTier, TierName};

pub use exclusions::{BundlerExclusions, EXCLUSIONS_DIR, EXTERNALS_ENV_VAR};
pub use scan::{BoundaryScanner, ScanReport};

/// Severity of a boundary crossing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    Warning,
    #[default]
    Error,
}

impl fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationSeverity::Warning => f.write_str("warning"),
            ViolationSeverity::Error => f.write_str("error"),
        }
    }
}

/// One declared feature and the module prefix that implements it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureBoundary {
    #[serde(rename = "id")]
    pub feature_id: String,

    pub tier: TierName,

    pub module_prefix: String,

    /// Regex matched against source lines and artifact text. Defaults to the
    /// escaped module prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_pattern: Option<String>,

    #[serde(default)]
    pub severity: ViolationSeverity,
}

impl FeatureBoundary {
    pub fn new(feature_id: &str, tier: TierName, module_prefix: &str) -> Self {
        Self {
            feature_id: feature_id.to_string(),
            tier,
            module_prefix: module_prefix.to_string(),
            import_pattern: None,
            severity: ViolationSeverity::Error,
        }
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.import_pattern = Some(pattern.to_string());
        self
    }

    pub fn with_severity(mut self, severity: ViolationSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Prefix without trailing slashes, used for both path and import matching.
    pub fn normalized_prefix(&self) -> &str {
        self.module_prefix.trim_end_matches('/')
    }

    pub fn effective_pattern(&self) -> String {
        self.import_pattern
            .clone()
            .unwrap_or_else(|| regex::escape(self.normalized_prefix()))
    }
}

/// A reference to a prohibited module found in source or compiled output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportViolation {
    pub file_path: String,
    pub line_number: usize,
    pub import_statement: String,
    pub prohibited_module: String,
    pub feature_id: String,
    pub severity: ViolationSeverity,
}

impl ImportViolation {
    pub fn is_error(&self) -> bool {
        self.severity == ViolationSeverity::Error
    }
}

impl fmt::Display for ImportViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {} references {} ({})",
            self.file_path, self.line_number, self.severity, self.prohibited_module, self.import_statement
        )
    }
}

/// A boundary with its pattern compiled.
#[derive(Debug, Clone)]
pub struct CompiledBoundary {
    pub boundary: FeatureBoundary,
    pub pattern: Regex,
}

#[derive(Debug, Deserialize)]
struct BoundaryFile {
    #[serde(default, rename = "feature")]
    features: Vec<FeatureBoundary>,
}

/// The validated set of feature boundaries, loaded once per process.
#[derive(Debug, Clone, Default)]
pub struct BoundaryTable {
    features: Vec<FeatureBoundary>,
    compiled: Vec<CompiledBoundary>,
}

impl BoundaryTable {
    /// Validate and compile a boundary list.
    ///
    /// Rejects duplicate feature IDs, a module prefix claimed by more than one
    /// tier, duplicate restricted prefixes, and invalid patterns.
    pub fn new(features: Vec<FeatureBoundary>) -> Result<Self> {
        let mut ids = HashSet::new();
        let mut prefix_owner: BTreeMap<&str, (TierName, &str)> = BTreeMap::new();

        for feature in &features {
            if feature.feature_id.trim().is_empty() {
                return Err(TiergateError::config("feature boundary with empty id"));
            }
            if feature.normalized_prefix().is_empty() {
                return Err(TiergateError::config(format!(
                    "feature '{}' has an empty module_prefix",
                    feature.feature_id
                )));
            }
            if !ids.insert(feature.feature_id.as_str()) {
                return Err(TiergateError::config(format!(
                    "duplicate feature id '{}'",
                    feature.feature_id
                )));
            }
            match prefix_owner.get(feature.normalized_prefix()) {
                Some((tier, owner)) if *tier != feature.tier => {
                    return Err(TiergateError::config(format!(
                        "module prefix '{}' is claimed by tier {} ({}) and tier {} ({})",
                        feature.module_prefix, tier, owner, feature.tier, feature.feature_id
                    )));
                }
                Some((_, owner)) if feature.tier == TierName::Enterprise => {
                    return Err(TiergateError::config(format!(
                        "enterprise features '{}' and '{}' share module prefix '{}'",
                        owner, feature.feature_id, feature.module_prefix
                    )));
                }
                _ => {
                    prefix_owner.insert(
                        feature.normalized_prefix(),
                        (feature.tier, feature.feature_id.as_str()),
                    );
                }
            }
        }

        let compiled = features
            .iter()
            .map(|feature| {
                let pattern = feature.effective_pattern();
                Regex::new(&pattern)
                    .map(|regex| CompiledBoundary {
                        boundary: feature.clone(),
                        pattern: regex,
                    })
                    .map_err(|e| {
                        TiergateError::config(format!(
                            "feature '{}' has an invalid import_pattern: {e}",
                            feature.feature_id
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { features, compiled })
    }

    /// Parse the `[[feature]]` TOML format.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: BoundaryFile = toml::from_str(content)?;
        Self::new(file.features)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TiergateError::config(format!(
                "cannot read feature boundary file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn features(&self) -> &[FeatureBoundary] {
        &self.features
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Boundaries whose code must not appear in `tier`'s artifact.
    pub fn prohibited_for(&self, tier: BuildTier) -> impl Iterator<Item = &CompiledBoundary> + '_ {
        self.compiled
            .iter()
            .filter(move |c| !tier.permits(c.boundary.tier))
    }

    /// Every boundary not owned by the community tier, regardless of the
    /// tier being built. Used for advisory reporting on enterprise builds.
    pub fn restricted(&self) -> impl Iterator<Item = &CompiledBoundary> {
        self.compiled
            .iter()
            .filter(|c| c.boundary.tier != TierName::Community)
    }

    /// Whether `relative_path` lives inside any restricted module prefix.
    pub fn owns_path(&self, relative_path: &str) -> Option<&FeatureBoundary> {
        self.restricted().map(|c| &c.boundary).find(|b| {
            let prefix = b.normalized_prefix();
            relative_path == prefix
                || relative_path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}
