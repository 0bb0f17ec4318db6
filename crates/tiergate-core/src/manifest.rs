//! Tier-specific dependency manifests.
//!
//! One TOML file per tier:
//!
//! ```toml
//! tier = "community"            # optional, must match when present
//!
//! [dependencies]
//! react = "^18.2.0"
//!
//! [licenses]
//! react = "MIT"
//! ```
//!
//! A manifest is loaded, validated against the [`LicensePolicy`], and only
//! then materialized into the file the external installer reads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::LicensePolicy;
use crate::error::{Result, TiergateError};
use crate::fsutil;
use crate::tier::{BuildTier, TierName};
use crate::validate::{CheckType, ValidationResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageManifest {
    pub tier: TierName,
    pub path: PathBuf,
    /// Name to version constraint.
    pub dependencies: BTreeMap<String, String>,
    /// Name to declared SPDX license expression.
    pub licenses: BTreeMap<String, String>,
    /// Set by a successful [`ManifestLoader::validate`].
    pub license_approved: bool,
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    tier: Option<TierName>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    licenses: BTreeMap<String, String>,
}

/// Installer-facing form of the manifest.
#[derive(Debug, Serialize)]
struct InstallManifest<'a> {
    name: String,
    private: bool,
    dependencies: &'a BTreeMap<String, String>,
}

impl PackageManifest {
    pub fn from_toml_str(tier: TierName, path: &Path, content: &str) -> Result<Self> {
        let file: ManifestFile = toml::from_str(content).map_err(|e| {
            TiergateError::config(format!("invalid manifest {}: {e}", path.display()))
        })?;
        if let Some(declared) = file.tier {
            if declared != tier {
                return Err(TiergateError::config(format!(
                    "manifest {} declares tier {declared} but was loaded for tier {tier}",
                    path.display()
                )));
            }
        }
        for name in file.licenses.keys() {
            if !file.dependencies.contains_key(name) {
                return Err(TiergateError::config(format!(
                    "manifest {} declares a license for '{name}' which is not a dependency",
                    path.display()
                )));
            }
        }
        Ok(Self {
            tier,
            path: path.to_path_buf(),
            dependencies: file.dependencies,
            licenses: file.licenses,
            license_approved: false,
        })
    }
}

/// Loads and validates manifests against one license policy.
pub struct ManifestLoader {
    policy: LicensePolicy,
    namespaces: Vec<Regex>,
}

impl ManifestLoader {
    pub fn new(policy: &LicensePolicy) -> Result<Self> {
        let namespaces = policy
            .proprietary_namespaces
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    TiergateError::config(format!("invalid proprietary namespace '{pattern}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            policy: policy.clone(),
            namespaces,
        })
    }

    pub fn load(&self, tier: BuildTier, path: &Path) -> Result<PackageManifest> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TiergateError::config(format!(
                "cannot read {} manifest {}: {e}",
                tier,
                path.display()
            ))
        })?;
        let manifest = PackageManifest::from_toml_str(tier.name(), path, &content)?;
        debug!(
            tier = %tier,
            path = %path.display(),
            dependencies = manifest.dependencies.len(),
            "manifest loaded"
        );
        Ok(manifest)
    }

    pub fn is_proprietary(&self, package: &str) -> bool {
        self.namespaces.iter().any(|ns| ns.is_match(package))
    }

    fn is_whitelisted(&self, package: &str) -> bool {
        self.policy.proprietary_whitelist.iter().any(|p| p == package)
    }

    /// Enforce namespace and license rules. Any violation is a
    /// configuration error naming every offending package; on success the
    /// manifest is marked approved.
    pub fn validate(&self, manifest: &mut PackageManifest) -> Result<ValidationResult> {
        let mut problems = Vec::new();
        let mut exempted = Vec::new();

        for name in manifest.dependencies.keys() {
            let proprietary = self.is_proprietary(name);
            if manifest.tier == TierName::Community && proprietary {
                problems.push(format!("'{name}' is in a proprietary namespace"));
                continue;
            }
            if manifest.tier == TierName::Enterprise && self.is_whitelisted(name) {
                exempted.push(name.clone());
                continue;
            }
            match manifest.licenses.get(name) {
                None => problems.push(format!("'{name}' declares no license")),
                Some(expr) if !license_allowed(expr, &self.policy.allowed) => {
                    problems.push(format!("'{name}' has license '{expr}' outside the allow-list"))
                }
                Some(_) => {}
            }
        }

        let reference = manifest.path.display().to_string();
        if !problems.is_empty() {
            manifest.license_approved = false;
            return Err(TiergateError::config(format!(
                "{} manifest {} rejected: {}",
                manifest.tier,
                reference,
                problems.join("; ")
            )));
        }

        manifest.license_approved = true;
        info!(
            tier = %manifest.tier,
            dependencies = manifest.dependencies.len(),
            exempted = exempted.len(),
            "manifest approved"
        );
        Ok(ValidationResult::pass(
            CheckType::Licenses,
            &reference,
            format!("{} dependencies approved", manifest.dependencies.len()),
        )
        .with_details(serde_json::json!({ "whitelisted": exempted })))
    }

    /// Write the approved manifest to where the installer expects it.
    pub fn materialize(&self, manifest: &PackageManifest, target: &Path) -> Result<()> {
        if !manifest.license_approved {
            return Err(TiergateError::config(format!(
                "refusing to materialize unvalidated manifest {}",
                manifest.path.display()
            )));
        }
        fsutil::write_json(
            target,
            &InstallManifest {
                name: format!("tiergate-{}", manifest.tier),
                private: true,
                dependencies: &manifest.dependencies,
            },
        )?;
        debug!(target = %target.display(), "manifest materialized");
        Ok(())
    }
}

/// Whether an SPDX expression is satisfied by `allowed`.
///
/// `OR` needs one allowed alternative, `AND` needs every term. Parentheses
/// are ignored and `WITH` exceptions follow their base license.
pub fn license_allowed(expression: &str, allowed: &[String]) -> bool {
    let flat = expression.replace(['(', ')'], " ");
    let tokens: Vec<&str> = flat.split_whitespace().collect();
    if tokens.is_empty() {
        return false;
    }

    tokens
        .split(|t| t.eq_ignore_ascii_case("OR"))
        .any(|alternative| {
            !alternative.is_empty()
                && alternative
                    .split(|t| t.eq_ignore_ascii_case("AND"))
                    .all(|term| match term.first() {
                        Some(id) => allowed.iter().any(|a| a.eq_ignore_ascii_case(id)),
                        None => false,
                    })
        })
}
