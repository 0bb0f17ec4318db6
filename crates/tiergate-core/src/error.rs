//! Error taxonomy shared by every Tiergate component.
//!
//! Four user-facing categories, each with a fixed process exit code:
//!
//! | category      | exit |
//! |---------------|------|
//! | build         | 1    |
//! | validation    | 2    |
//! | configuration | 3    |
//! | dependency    | 4    |

use serde::{Deserialize, Serialize};

use crate::boundary::ImportViolation;
use crate::source::{ProbeFailure, SourceAttempt};
use crate::tier::TierName;

/// Failure category reported to users and consumed by the CI aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Build,
    Validation,
    Configuration,
    Dependency,
}

impl FailureCategory {
    pub const ALL: [FailureCategory; 4] = [
        FailureCategory::Build,
        FailureCategory::Validation,
        FailureCategory::Configuration,
        FailureCategory::Dependency,
    ];

    /// Process exit code for this category.
    pub fn exit_code(self) -> i32 {
        match self {
            FailureCategory::Build => 1,
            FailureCategory::Validation => 2,
            FailureCategory::Configuration => 3,
            FailureCategory::Dependency => 4,
        }
    }

    /// Inverse of [`FailureCategory::exit_code`]. `0` and unknown codes map to `None`.
    pub fn from_exit_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.exit_code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureCategory::Build => "build_error",
            FailureCategory::Validation => "validation_error",
            FailureCategory::Configuration => "configuration_error",
            FailureCategory::Dependency => "dependency_error",
        }
    }

    /// Generic one-line hint, used when the error has nothing more specific.
    pub fn default_remediation(self) -> &'static str {
        match self {
            FailureCategory::Build => "inspect the captured tool output and fix the failing step",
            FailureCategory::Validation => "fix the failed checks listed above and rebuild",
            FailureCategory::Configuration => "fix tiergate.toml, the manifests or the CLI arguments",
            FailureCategory::Dependency => {
                "check network access to the registry or populate the vendored cache"
            }
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tiergate errors.
#[derive(Debug, thiserror::Error)]
pub enum TiergateError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(
        "no dependency source available for tier {tier}: {}",
        format_attempts(.attempts)
    )]
    Dependency {
        tier: TierName,
        attempts: Vec<SourceAttempt>,
    },

    #[error("{tool} exited with code {exit_code}: {}", .stderr.trim_end())]
    Build {
        tool: String,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("validation failed: {summary}")]
    Validation {
        summary: String,
        violations: Vec<ImportViolation>,
        failed_checks: Vec<String>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

impl TiergateError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn category(&self) -> FailureCategory {
        match self {
            Self::Configuration(_) | Self::Io(_) | Self::Serialization(_) | Self::Toml(_) => {
                FailureCategory::Configuration
            }
            Self::Dependency { .. } => FailureCategory::Dependency,
            Self::Build { .. } => FailureCategory::Build,
            Self::Validation { .. } => FailureCategory::Validation,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }

    /// One-line actionable hint for the report.
    pub fn remediation(&self) -> String {
        match self {
            Self::Dependency { attempts, .. } => {
                let failures = attempts.iter().filter_map(|a| a.failure.as_ref());
                let mut missing_env = None;
                for failure in failures {
                    match failure {
                        ProbeFailure::CredentialsRejected { .. } => {
                            return "refresh expired registry credentials".to_string();
                        }
                        ProbeFailure::CredentialsMissing { env } => {
                            missing_env.get_or_insert_with(|| env.clone());
                        }
                        _ => {}
                    }
                }
                match missing_env {
                    Some(env) => format!("export {env} with a valid registry token"),
                    None => FailureCategory::Dependency.default_remediation().to_string(),
                }
            }
            Self::Build { tool, .. } => format!("inspect the stderr captured from {tool} above"),
            Self::Validation { violations, .. } if !violations.is_empty() => {
                "remove the prohibited imports listed above from the community sources".to_string()
            }
            other => other.category().default_remediation().to_string(),
        }
    }
}

fn format_attempts(attempts: &[SourceAttempt]) -> String {
    if attempts.is_empty() {
        return "no sources configured".to_string();
    }
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for Tiergate operations.
pub type Result<T> = std::result::Result<T, TiergateError>;
