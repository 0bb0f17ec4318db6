//! Dependency sources and the ordered-fallback resolver.
//!
//! A tier owns an ordered list of [`DependencySource`]s. Availability is never
//! stored on the source: it is probed fresh on every resolution through a
//! [`SourceProbe`], and the outcome of each probe is kept in a
//! [`SourceAttempt`].

pub mod probe;
pub mod resolver;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TiergateError};

pub use probe::{Credentials, DefaultProbe, StaticProbe, VENDORED_CHECKSUM_FILE};
pub use resolver::{ResolvedSource, SourceResolver, DEFAULT_PROBE_TIMEOUT};

/// Kind of origin packages are fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Registry,
    Vendored,
    Cdn,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Registry => "registry",
            SourceType::Vendored => "vendored",
            SourceType::Cdn => "cdn",
        }
    }

    /// Registry and CDN sources are probed over the network.
    pub fn is_remote(self) -> bool {
        !matches!(self, SourceType::Vendored)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = TiergateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "registry" => Ok(SourceType::Registry),
            "vendored" => Ok(SourceType::Vendored),
            "cdn" => Ok(SourceType::Cdn),
            other => Err(TiergateError::config(format!(
                "unknown source type '{other}' (expected registry, vendored or cdn)"
            ))),
        }
    }
}

/// `--source` selection: the whole ordered list, or only one source type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceSelection {
    #[default]
    Auto,
    Only(SourceType),
}

impl SourceSelection {
    pub fn admits(&self, source_type: SourceType) -> bool {
        match self {
            SourceSelection::Auto => true,
            SourceSelection::Only(only) => *only == source_type,
        }
    }
}

impl FromStr for SourceSelection {
    type Err = TiergateError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(SourceSelection::Auto)
        } else {
            s.parse().map(SourceSelection::Only)
        }
    }
}

impl fmt::Display for SourceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSelection::Auto => f.write_str("auto"),
            SourceSelection::Only(t) => t.fmt(f),
        }
    }
}

/// One configured origin for packages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySource {
    #[serde(rename = "type")]
    pub source_type: SourceType,

    /// 1 is tried first.
    pub priority: u32,

    /// URL for registry/cdn, filesystem path for vendored.
    pub locator: String,

    #[serde(default)]
    pub requires_auth: bool,

    /// Environment variable holding the credential when `requires_auth` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_env: Option<String>,
}

impl DependencySource {
    pub fn new(source_type: SourceType, priority: u32, locator: impl Into<String>) -> Self {
        Self {
            source_type,
            priority,
            locator: locator.into(),
            requires_auth: false,
            auth_env: None,
        }
    }

    pub fn with_auth(mut self, env: impl Into<String>) -> Self {
        self.requires_auth = true;
        self.auth_env = Some(env.into());
        self
    }
}

/// Why a probe found a source unusable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeFailure {
    Timeout { after_ms: u64 },
    CredentialsMissing { env: String },
    CredentialsRejected { status: u16 },
    Unreachable { detail: String },
    MissingManifest { detail: String },
    ChecksumMismatch { file: String },
    Excluded { reason: String },
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::Timeout { after_ms } => write!(f, "timed out after {after_ms}ms"),
            ProbeFailure::CredentialsMissing { env } => {
                write!(f, "credentials missing (set {env})")
            }
            ProbeFailure::CredentialsRejected { status } => {
                write!(f, "credentials rejected (HTTP {status})")
            }
            ProbeFailure::Unreachable { detail } => write!(f, "unreachable: {detail}"),
            ProbeFailure::MissingManifest { detail } => {
                write!(f, "missing checksum manifest: {detail}")
            }
            ProbeFailure::ChecksumMismatch { file } => write!(f, "checksum mismatch for {file}"),
            ProbeFailure::Excluded { reason } => write!(f, "excluded: {reason}"),
        }
    }
}

/// Result of a single availability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Available,
    Unavailable(ProbeFailure),
}

/// Record of one source considered during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAttempt {
    pub source_type: SourceType,
    pub locator: String,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ProbeFailure>,
    pub elapsed_ms: u64,
}

impl SourceAttempt {
    pub fn available(source_type: SourceType, locator: impl Into<String>) -> Self {
        Self {
            source_type,
            locator: locator.into(),
            available: true,
            failure: None,
            elapsed_ms: 0,
        }
    }

    pub fn failed(source_type: SourceType, locator: impl Into<String>, failure: ProbeFailure) -> Self {
        Self {
            source_type,
            locator: locator.into(),
            available: false,
            failure: Some(failure),
            elapsed_ms: 0,
        }
    }

    fn with_elapsed(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }
}

impl fmt::Display for SourceAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            None => write!(f, "{} {} (available)", self.source_type, self.locator),
            Some(failure) => write!(f, "{} {} ({})", self.source_type, self.locator, failure),
        }
    }
}

/// Pluggable availability predicate.
///
/// The resolver owns ordering and timeouts; implementations only answer
/// "can this source be used right now". Swapping the implementation changes
/// how restricted sources are blocked without touching resolution logic.
#[async_trait]
pub trait SourceProbe: Send + Sync {
    async fn probe(&self, source: &DependencySource) -> ProbeOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_selection_parses() {
        assert_eq!("auto".parse::<SourceSelection>().unwrap(), SourceSelection::Auto);
        assert_eq!(
            "vendored".parse::<SourceSelection>().unwrap(),
            SourceSelection::Only(SourceType::Vendored)
        );
        assert!("ftp".parse::<SourceSelection>().is_err());
    }

    #[test]
    fn selection_admits() {
        assert!(SourceSelection::Auto.admits(SourceType::Cdn));
        assert!(SourceSelection::Only(SourceType::Registry).admits(SourceType::Registry));
        assert!(!SourceSelection::Only(SourceType::Registry).admits(SourceType::Vendored));
    }

    #[test]
    fn source_deserializes_from_toml() {
        let source: DependencySource = toml::from_str(
            r#"
            type = "registry"
            priority = 1
            locator = "https://registry.example.com"
            requires_auth = true
            auth_env = "REGISTRY_TOKEN"
            "#,
        )
        .unwrap();
        assert_eq!(source.source_type, SourceType::Registry);
        assert!(source.requires_auth);
        assert_eq!(source.auth_env.as_deref(), Some("REGISTRY_TOKEN"));
    }

    #[test]
    fn attempt_display_names_reason() {
        let attempt = SourceAttempt::failed(
            SourceType::Cdn,
            "https://cdn.example.com",
            ProbeFailure::CredentialsMissing {
                env: "CDN_TOKEN".to_string(),
            },
        );
        assert_eq!(
            attempt.to_string(),
            "cdn https://cdn.example.com (credentials missing (set CDN_TOKEN))"
        );
    }
}
