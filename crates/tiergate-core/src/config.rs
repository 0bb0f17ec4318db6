//! `tiergate.toml` project configuration.
//!
//! Every field has a default; paths are relative to the project root.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TiergateError};
use crate::source::{DependencySource, SourceType};
use crate::tier::TierName;
use crate::validate::CheckType;

pub const CONFIG_FILE: &str = "tiergate.toml";

/// Environment override for the config file location.
pub const CONFIG_ENV_VAR: &str = "TIERGATE_CONFIG";

/// Common OSI-approved SPDX identifiers.
pub const DEFAULT_ALLOWED_LICENSES: &[&str] = &[
    "0BSD",
    "Apache-2.0",
    "BSD-2-Clause",
    "BSD-3-Clause",
    "BlueOak-1.0.0",
    "ISC",
    "MIT",
    "MPL-2.0",
    "Unlicense",
    "Zlib",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub project: ProjectConfig,
    pub tiers: TiersConfig,
    pub licenses: LicensePolicy,
    pub toolchain: ToolchainConfig,
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Source root walked by the pre-build scan.
    pub community_root: PathBuf,
    pub output_dir: PathBuf,
    /// File the compiler writes inside the staging output directory.
    pub artifact_name: String,
    /// Where the active manifest is materialized for the installer.
    pub install_manifest: PathBuf,
    pub boundaries: PathBuf,
    /// Baselines and determinism ledger.
    pub state_dir: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            community_root: PathBuf::from("src"),
            output_dir: PathBuf::from("dist"),
            artifact_name: "bundle.js".to_string(),
            install_manifest: PathBuf::from("package.json"),
            boundaries: PathBuf::from("feature-boundaries.toml"),
            state_dir: PathBuf::from(".tiergate"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub manifest: PathBuf,
    #[serde(default)]
    pub sources: Vec<DependencySource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiersConfig {
    pub community: TierPolicy,
    pub enterprise: TierPolicy,
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            community: TierPolicy {
                manifest: PathBuf::from("manifests/community.toml"),
                sources: vec![
                    DependencySource::new(SourceType::Registry, 1, "https://registry.npmjs.org/"),
                    DependencySource::new(SourceType::Vendored, 2, "vendor/community"),
                ],
            },
            enterprise: TierPolicy {
                manifest: PathBuf::from("manifests/enterprise.toml"),
                sources: vec![
                    DependencySource::new(SourceType::Registry, 1, "https://registry.npmjs.org/"),
                    DependencySource::new(SourceType::Vendored, 2, "vendor/enterprise"),
                ],
            },
        }
    }
}

impl TiersConfig {
    pub fn policy(&self, tier: TierName) -> &TierPolicy {
        match tier {
            TierName::Community => &self.community,
            TierName::Enterprise => &self.enterprise,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicensePolicy {
    pub allowed: Vec<String>,
    /// Regexes matched against dependency names.
    pub proprietary_namespaces: Vec<String>,
    /// Enterprise packages exempt from the allow-list.
    pub proprietary_whitelist: Vec<String>,
}

impl Default for LicensePolicy {
    fn default() -> Self {
        Self {
            allowed: DEFAULT_ALLOWED_LICENSES.iter().map(|s| s.to_string()).collect(),
            proprietary_namespaces: vec!["^@enterprise/".to_string()],
            proprietary_whitelist: Vec::new(),
        }
    }
}

/// An external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

fn default_tool_timeout() -> u64 {
    1800
}

impl ExternalCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_secs: default_tool_timeout(),
        }
    }

    /// Shorthand for `sh -c <script>`.
    pub fn shell(script: &str) -> Self {
        Self::new("sh", &["-c", script])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    pub install: Option<ExternalCommand>,
    pub compile: Option<ExternalCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub probe_timeout_secs: u64,
    pub checks: Vec<CheckType>,
    /// Maximum artifact size as a percentage of the recorded baseline.
    pub size_budget_percent: u32,
    pub size_hard_fail: bool,
    /// Re-run the compiler into a scratch directory and compare hashes.
    pub verify_rebuild: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 5,
            checks: CheckType::ALL.to_vec(),
            size_budget_percent: 120,
            size_hard_fail: false,
            verify_rebuild: false,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TiergateError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| TiergateError::config(format!("{}: {e}", path.display())))
    }

    /// Check the tier policy invariants.
    pub fn validate(&self) -> Result<()> {
        for tier in TierName::ALL {
            let policy = self.tiers.policy(tier);
            let mut priorities = HashSet::new();
            for source in &policy.sources {
                if !priorities.insert(source.priority) {
                    return Err(TiergateError::config(format!(
                        "tier {tier} lists priority {} more than once",
                        source.priority
                    )));
                }
                if source.priority == 0 {
                    return Err(TiergateError::config(format!(
                        "tier {tier}: source priorities start at 1"
                    )));
                }
                let is_url = source.locator.starts_with("http://")
                    || source.locator.starts_with("https://");
                match source.source_type {
                    SourceType::Vendored if is_url => {
                        return Err(TiergateError::config(format!(
                            "tier {tier}: vendored source '{}' must be a local path",
                            source.locator
                        )));
                    }
                    SourceType::Registry | SourceType::Cdn if !is_url => {
                        return Err(TiergateError::config(format!(
                            "tier {tier}: {} source '{}' must be an http(s) URL",
                            source.source_type, source.locator
                        )));
                    }
                    _ => {}
                }
                if source.requires_auth && source.auth_env.is_none() {
                    return Err(TiergateError::config(format!(
                        "tier {tier}: source '{}' requires auth but names no auth_env",
                        source.locator
                    )));
                }
            }
        }

        for source in &self.tiers.community.sources {
            if source.source_type == SourceType::Cdn {
                return Err(TiergateError::config(
                    "the community tier must not list a cdn source",
                ));
            }
            if source.requires_auth {
                return Err(TiergateError::config(format!(
                    "community source '{}' must not require credentials",
                    source.locator
                )));
            }
        }

        if self.validation.probe_timeout_secs == 0 {
            return Err(TiergateError::config("probe_timeout_secs must be at least 1"));
        }
        if self.validation.size_budget_percent == 0 {
            return Err(TiergateError::config("size_budget_percent must be positive"));
        }
        if self.project.artifact_name.trim().is_empty() {
            return Err(TiergateError::config("artifact_name must not be empty"));
        }
        Ok(())
    }
}
