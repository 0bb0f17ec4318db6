//! Artifact Validator: independent checks run against a finished artifact.
//!
//! Every check yields exactly one [`ValidationResult`]. Checks never fail the
//! validator itself; an unreadable input is reported as a failed check.

pub mod checks;
pub mod ledger;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifact::BuildArtifact;
use crate::boundary::BoundaryTable;
use crate::config::{LicensePolicy, ValidationConfig};
use crate::error::{Result, TiergateError};
use crate::manifest::PackageManifest;
use crate::obs;
use crate::tier::BuildTier;

pub use ledger::{DeterminismLedger, SizeBaseline, DETERMINISM_FILE, SIZE_BASELINE_FILE};

/// `validate-artifact` exit code: every check passed (warnings allowed).
pub const EXIT_PASSED: i32 = 0;
/// `validate-artifact` exit code: at least one hard failure.
pub const EXIT_HARD_FAILURE: i32 = 1;
/// `validate-artifact` exit code: invalid invocation arguments.
pub const EXIT_USAGE: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Imports,
    Licenses,
    Size,
    Determinism,
    Bom,
}

impl CheckType {
    pub const ALL: [CheckType; 5] = [
        CheckType::Imports,
        CheckType::Licenses,
        CheckType::Size,
        CheckType::Determinism,
        CheckType::Bom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CheckType::Imports => "imports",
            CheckType::Licenses => "licenses",
            CheckType::Size => "size",
            CheckType::Determinism => "determinism",
            CheckType::Bom => "bom",
        }
    }

    /// Parse `all` or a comma-separated list. Order is normalised and
    /// duplicates dropped.
    pub fn parse_list(value: &str) -> Result<Vec<CheckType>> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(Self::ALL.to_vec());
        }
        let mut checks = trimmed
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(CheckType::from_str)
            .collect::<Result<Vec<_>>>()?;
        if checks.is_empty() {
            return Err(TiergateError::config("no checks selected"));
        }
        checks.sort();
        checks.dedup();
        Ok(checks)
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckType {
    type Err = TiergateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                TiergateError::config(format!(
                    "unknown check '{s}' (expected all or imports, licenses, size, determinism, bom)"
                ))
            })
    }
}

/// How much a failed check matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub check_type: CheckType,
    pub artifact_ref: String,
    pub passed: bool,
    pub severity: CheckSeverity,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl ValidationResult {
    pub fn pass(check_type: CheckType, artifact_ref: &str, message: impl Into<String>) -> Self {
        Self {
            check_type,
            artifact_ref: artifact_ref.to_string(),
            passed: true,
            severity: CheckSeverity::Info,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn fail(
        check_type: CheckType,
        artifact_ref: &str,
        severity: CheckSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            check_type,
            artifact_ref: artifact_ref.to_string(),
            passed: false,
            severity,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_severity(mut self, severity: CheckSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Only error-severity failures block; warnings never promote.
    pub fn is_hard_failure(&self) -> bool {
        !self.passed && self.severity == CheckSeverity::Error
    }
}

/// `0` when nothing hard-failed, `1` otherwise.
pub fn exit_code(results: &[ValidationResult]) -> i32 {
    if results.iter().any(ValidationResult::is_hard_failure) {
        EXIT_HARD_FAILURE
    } else {
        EXIT_PASSED
    }
}

/// Inputs the checks read besides the artifact itself.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub boundaries: &'a BoundaryTable,
    pub licenses: &'a LicensePolicy,
    /// Preferred license source; the BOM is read when absent.
    pub manifest: Option<&'a PackageManifest>,
    /// Holds the size baseline and determinism ledger.
    pub state_dir: Option<&'a Path>,
    pub size_budget_percent: u32,
    pub size_hard_fail: bool,
    /// Hash of an independent rebuild from the same inputs.
    pub rebuild_sha256: Option<&'a str>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(boundaries: &'a BoundaryTable, licenses: &'a LicensePolicy) -> Self {
        let defaults = ValidationConfig::default();
        Self {
            boundaries,
            licenses,
            manifest: None,
            state_dir: None,
            size_budget_percent: defaults.size_budget_percent,
            size_hard_fail: defaults.size_hard_fail,
            rebuild_sha256: None,
        }
    }

    pub fn with_config(mut self, config: &ValidationConfig) -> Self {
        self.size_budget_percent = config.size_budget_percent;
        self.size_hard_fail = config.size_hard_fail;
        self
    }

    pub fn with_manifest(mut self, manifest: &'a PackageManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn with_state_dir(mut self, state_dir: &'a Path) -> Self {
        self.state_dir = Some(state_dir);
        self
    }

    pub fn with_rebuild_hash(mut self, sha256: &'a str) -> Self {
        self.rebuild_sha256 = Some(sha256);
        self
    }
}

pub struct ArtifactValidator<'a> {
    ctx: ValidationContext<'a>,
}

impl<'a> ArtifactValidator<'a> {
    pub fn new(ctx: ValidationContext<'a>) -> Self {
        Self { ctx }
    }

    /// Run `checks` in their canonical order. Results are independent of
    /// the order requested.
    pub fn validate(
        &self,
        artifact: &BuildArtifact,
        tier: BuildTier,
        checks: &[CheckType],
    ) -> Vec<ValidationResult> {
        let mut selected = checks.to_vec();
        selected.sort();
        selected.dedup();

        selected
            .into_iter()
            .map(|check| {
                let result = match check {
                    CheckType::Imports => checks::imports(&self.ctx, artifact, tier),
                    CheckType::Licenses => checks::licenses(&self.ctx, artifact, tier),
                    CheckType::Size => checks::size(&self.ctx, artifact),
                    CheckType::Determinism => checks::determinism(&self.ctx, artifact, tier),
                    CheckType::Bom => checks::bom(artifact),
                };
                debug!(check = %check, passed = result.passed, message = %result.message, "check finished");
                obs::emit_validation_check(check.as_str(), result.passed, result.is_hard_failure());
                result
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_all_and_lists() {
        assert_eq!(CheckType::parse_list("all").unwrap().len(), 5);
        assert_eq!(
            CheckType::parse_list("bom, imports,bom").unwrap(),
            vec![CheckType::Imports, CheckType::Bom]
        );
        assert!(CheckType::parse_list("").is_err());
        assert!(CheckType::parse_list("imports,speed").is_err());
    }

    #[test]
    fn warnings_never_produce_hard_failure() {
        let warn = ValidationResult::fail(CheckType::Size, "a", CheckSeverity::Warning, "over budget");
        let pass = ValidationResult::pass(CheckType::Bom, "a", "ok");
        assert!(!warn.is_hard_failure());
        assert_eq!(exit_code(&[warn.clone(), pass]), EXIT_PASSED);

        let hard = ValidationResult::fail(CheckType::Bom, "a", CheckSeverity::Error, "missing");
        assert_eq!(exit_code(&[warn, hard]), EXIT_HARD_FAILURE);
    }

    #[test]
    fn result_serializes_camel_case() {
        let value = serde_json::to_value(ValidationResult::pass(CheckType::Imports, "dist/a.js", "ok")).unwrap();
        assert_eq!(value["checkType"], "imports");
        assert_eq!(value["artifactRef"], "dist/a.js");
    }
}
