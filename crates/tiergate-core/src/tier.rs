//! Build tier selection.
//!
//! A [`BuildTier`] is chosen once per invocation and passed by value to every
//! component afterwards. There is no process-wide "current tier".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::boundary::BoundaryTable;
use crate::error::{Result, TiergateError};

/// Environment variable consulted when no `--tier` flag is given.
pub const TIER_ENV_VAR: &str = "TIER";

/// Known tier names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierName {
    Community,
    Enterprise,
}

impl TierName {
    pub const ALL: [TierName; 2] = [TierName::Community, TierName::Enterprise];

    pub fn as_str(self) -> &'static str {
        match self {
            TierName::Community => "community",
            TierName::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for TierName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierName {
    type Err = TiergateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "community" => Ok(TierName::Community),
            "enterprise" => Ok(TierName::Enterprise),
            other => Err(TiergateError::config(format!(
                "unknown tier '{other}' (expected 'community' or 'enterprise')"
            ))),
        }
    }
}

/// The tier a build runs under. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildTier {
    name: TierName,
}

impl BuildTier {
    pub const DEFAULT: BuildTier = BuildTier {
        name: TierName::Community,
    };

    pub fn new(name: TierName) -> Self {
        Self { name }
    }

    pub fn community() -> Self {
        Self::new(TierName::Community)
    }

    pub fn enterprise() -> Self {
        Self::new(TierName::Enterprise)
    }

    pub fn name(&self) -> TierName {
        self.name
    }

    pub fn is_default(&self) -> bool {
        *self == Self::DEFAULT
    }

    /// Community never needs credentials.
    pub fn requires_auth(&self) -> bool {
        matches!(self.name, TierName::Enterprise)
    }

    pub fn is_community(&self) -> bool {
        matches!(self.name, TierName::Community)
    }

    /// Whether code owned by `owner` may ship in this tier's artifact.
    pub fn permits(&self, owner: TierName) -> bool {
        match self.name {
            TierName::Community => owner == TierName::Community,
            TierName::Enterprise => true,
        }
    }

    /// Feature IDs from the boundary table this tier may include.
    pub fn allowed_feature_ids<'a>(&self, table: &'a BoundaryTable) -> Vec<&'a str> {
        table
            .features()
            .iter()
            .filter(|f| self.permits(f.tier))
            .map(|f| f.feature_id.as_str())
            .collect()
    }
}

impl fmt::Display for BuildTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.name, f)
    }
}

/// Resolve the effective tier: explicit flag, then environment, then default.
///
/// A blank environment value counts as unset; a blank flag is an error.
pub fn select_tier(cli_flag: Option<&str>, env_var: Option<&str>) -> Result<BuildTier> {
    if let Some(flag) = cli_flag {
        return flag.parse::<TierName>().map(BuildTier::new);
    }
    match env_var.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => value.parse::<TierName>().map(BuildTier::new),
        None => Ok(BuildTier::DEFAULT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{FeatureBoundary, ViolationSeverity};

    #[test]
    fn flag_beats_environment() {
        let tier = select_tier(Some("enterprise"), Some("community")).unwrap();
        assert_eq!(tier.name(), TierName::Enterprise);

        let tier = select_tier(Some("community"), Some("enterprise")).unwrap();
        assert_eq!(tier.name(), TierName::Community);
    }

    #[test]
    fn environment_used_without_flag() {
        let tier = select_tier(None, Some("enterprise")).unwrap();
        assert_eq!(tier.name(), TierName::Enterprise);
    }

    #[test]
    fn default_is_community() {
        let tier = select_tier(None, None).unwrap();
        assert!(tier.is_default());
        assert!(!tier.requires_auth());
        assert_eq!(tier, BuildTier::community());
    }

    #[test]
    fn blank_environment_is_ignored() {
        let tier = select_tier(None, Some("  ")).unwrap();
        assert_eq!(tier, BuildTier::DEFAULT);
    }

    #[test]
    fn invalid_names_are_configuration_errors() {
        for (flag, env) in [
            (Some("premium"), None),
            (Some(""), Some("community")),
            (None, Some("pro")),
            (Some("enterprise-ish"), Some("enterprise")),
        ] {
            let err = select_tier(flag, env).unwrap_err();
            assert!(
                matches!(err, TiergateError::Configuration(_)),
                "{flag:?}/{env:?} should be a configuration error"
            );
        }
    }

    #[test]
    fn invalid_flag_is_not_rescued_by_valid_env() {
        assert!(select_tier(Some("gold"), Some("community")).is_err());
    }

    #[test]
    fn names_are_case_insensitive() {
        let tier = select_tier(Some("Enterprise"), None).unwrap();
        assert_eq!(tier.name(), TierName::Enterprise);
    }

    #[test]
    fn enterprise_requires_auth() {
        assert!(BuildTier::enterprise().requires_auth());
        assert!(!BuildTier::enterprise().is_default());
    }

    #[test]
    fn allowed_features_follow_tier() {
        let table = BoundaryTable::new(vec![
            FeatureBoundary::new("themes", TierName::Community, "core/themes"),
            FeatureBoundary::new("sso", TierName::Enterprise, "enterprise/sso"),
            FeatureBoundary::new("audit", TierName::Enterprise, "enterprise/audit")
                .with_severity(ViolationSeverity::Warning),
        ])
        .unwrap();

        assert_eq!(
            BuildTier::community().allowed_feature_ids(&table),
            vec!["themes"]
        );
        assert_eq!(
            BuildTier::enterprise().allowed_feature_ids(&table),
            vec!["themes", "sso", "audit"]
        );
    }
}
