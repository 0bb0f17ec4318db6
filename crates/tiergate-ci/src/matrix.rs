//! Matrix planning: which (tier, platform) jobs run and which secrets each sees.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tiergate_core::{EngineConfig, TierName};

/// One scheduled CI leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiMatrixJob {
    pub tier: TierName,
    pub platform: String,

    /// Environment variables this job may see. Always empty for community jobs.
    pub secrets_scope: Vec<String>,

    /// Forked contribution; only community jobs are scheduled for these.
    pub external_contribution: bool,
}

impl CiMatrixJob {
    /// Stable job identifier, also used as the job's output directory name.
    pub fn id(&self) -> String {
        format!("{}-{}", self.tier, self.platform)
    }

    /// Scheduling invariants, as violation messages.
    pub fn scope_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        if self.external_contribution && self.tier != TierName::Community {
            violations.push(format!(
                "job '{}' runs a {} build for an external contribution",
                self.id(),
                self.tier
            ));
        }
        if self.tier == TierName::Community && !self.secrets_scope.is_empty() {
            violations.push(format!(
                "community job '{}' was given secrets: {}",
                self.id(),
                self.secrets_scope.join(", ")
            ));
        }
        violations
    }
}

/// The tiers and platforms a matrix covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixSpec {
    pub tiers: Vec<TierName>,
    pub platforms: Vec<String>,
    #[serde(default)]
    pub external_contribution: bool,
}

impl MatrixSpec {
    /// Both tiers across `platforms`.
    pub fn new<I, S>(platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tiers: TierName::ALL.to_vec(),
            platforms: platforms.into_iter().map(Into::into).collect(),
            external_contribution: false,
        }
    }

    pub fn with_tiers(mut self, tiers: Vec<TierName>) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn external(mut self, external: bool) -> Self {
        self.external_contribution = external;
        self
    }

    /// Expand into jobs, tier-major, duplicates dropped.
    ///
    /// Enterprise jobs receive the `auth_env` of every enterprise source that
    /// requires authentication. External contributions drop enterprise jobs.
    pub fn plan(&self, config: &EngineConfig) -> Vec<CiMatrixJob> {
        let tiers: BTreeSet<TierName> = self.tiers.iter().copied().collect();
        let mut platforms: Vec<&str> = Vec::new();
        for platform in &self.platforms {
            let platform = platform.trim();
            if !platform.is_empty() && !platforms.contains(&platform) {
                platforms.push(platform);
            }
        }

        let mut jobs = Vec::new();
        for tier in tiers {
            if self.external_contribution && tier != TierName::Community {
                tracing::info!(tier = %tier, "skipping tier for external contribution");
                continue;
            }
            let secrets_scope = secrets_for(config, tier);
            for platform in &platforms {
                jobs.push(CiMatrixJob {
                    tier,
                    platform: platform.to_string(),
                    secrets_scope: secrets_scope.clone(),
                    external_contribution: self.external_contribution,
                });
            }
        }
        jobs
    }
}

/// Secret names a tier's jobs may see.
pub fn secrets_for(config: &EngineConfig, tier: TierName) -> Vec<String> {
    if tier == TierName::Community {
        return Vec::new();
    }
    let names: BTreeSet<String> = config
        .tiers
        .policy(tier)
        .sources
        .iter()
        .filter(|s| s.requires_auth)
        .filter_map(|s| s.auth_env.clone())
        .collect();
    names.into_iter().collect()
}

/// Every secret name any job in `jobs` is scoped to.
pub fn known_secrets(jobs: &[CiMatrixJob]) -> BTreeSet<String> {
    jobs.iter()
        .flat_map(|j| j.secrets_scope.iter().cloned())
        .collect()
}
