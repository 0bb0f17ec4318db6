//! Build reports: one JSON document or a multi-section human rendering.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::boundary::ImportViolation;
use crate::error::FailureCategory;
use crate::source::SourceAttempt;
use crate::tier::TierName;
use crate::validate::{CheckSeverity, ValidationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSummary {
    pub path: String,
    pub sha256: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSummary {
    pub passed: bool,
    pub message: String,
    pub severity: CheckSeverity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub duration_seconds: f64,
    pub platform: String,
    pub source_revision: String,
    pub build_id: String,
}

/// One external tool run, included with `--debug`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSummary {
    pub tool: String,
    pub command: String,
    pub duration_ms: u64,
    pub stdout: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub status: BuildStatus,
    pub tier: Option<TierName>,
    /// Type of the dependency source used.
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_locator: Option<String>,
    pub artifact: Option<ArtifactSummary>,
    #[serde(default)]
    pub validation: BTreeMap<String, CheckSummary>,
    pub metadata: ReportMetadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_category: Option<FailureCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<ImportViolation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_attempts: Vec<SourceAttempt>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSummary>,
}

impl BuildReport {
    pub fn set_validation(&mut self, results: &[ValidationResult]) {
        self.validation = results
            .iter()
            .map(|r| {
                (
                    r.check_type.as_str().to_string(),
                    CheckSummary {
                        passed: r.passed,
                        message: r.message.clone(),
                        severity: r.severity,
                    },
                )
            })
            .collect();
    }

    pub fn exit_code(&self) -> i32 {
        match (self.status, self.failure_category) {
            (BuildStatus::Success, _) => 0,
            (BuildStatus::Failure, Some(category)) => category.exit_code(),
            (BuildStatus::Failure, None) => FailureCategory::Build.exit_code(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Multi-section text for terminals.
    pub fn render_human(&self) -> String {
        let mut out = String::new();
        let tier = self
            .tier
            .map(|t| t.to_string())
            .unwrap_or_else(|| "unresolved".to_string());

        let _ = writeln!(out, "== Build ==");
        let status = match self.status {
            BuildStatus::Success => "SUCCESS",
            BuildStatus::Failure => "FAILURE",
        };
        let _ = writeln!(out, "  status:    {status}");
        let _ = writeln!(out, "  tier:      {tier}");
        let _ = writeln!(out, "  platform:  {}", self.metadata.platform);
        let _ = writeln!(out, "  revision:  {}", self.metadata.source_revision);
        let _ = writeln!(out, "  build id:  {}", self.metadata.build_id);
        let _ = writeln!(out, "  duration:  {:.2}s", self.metadata.duration_seconds);

        if self.source.is_some() || !self.source_attempts.is_empty() {
            let _ = writeln!(out, "\n== Dependency source ==");
            if let Some(source) = &self.source {
                let locator = self.source_locator.as_deref().unwrap_or("");
                let _ = writeln!(out, "  using: {source} {locator}");
            }
            for attempt in &self.source_attempts {
                let _ = writeln!(out, "  - {attempt}");
            }
        }

        if let Some(artifact) = &self.artifact {
            let _ = writeln!(out, "\n== Artifact ==");
            let _ = writeln!(out, "  path:    {}", artifact.path);
            let _ = writeln!(out, "  sha256:  {}", artifact.sha256);
            let _ = writeln!(out, "  size:    {} bytes", artifact.size_bytes);
        }

        if !self.validation.is_empty() {
            let _ = writeln!(out, "\n== Validation ==");
            for (check, summary) in &self.validation {
                let mark = match (summary.passed, summary.severity) {
                    (true, CheckSeverity::Warning) => "warn",
                    (true, _) => "pass",
                    (false, CheckSeverity::Error) => "FAIL",
                    (false, _) => "warn",
                };
                let _ = writeln!(out, "  [{mark}] {check}: {}", summary.message);
            }
        }

        if !self.tools.is_empty() {
            let _ = writeln!(out, "\n== Tools ==");
            for tool in &self.tools {
                let _ = writeln!(out, "  {} ({} ms): {}", tool.tool, tool.duration_ms, tool.command);
                for line in tool.stdout.lines() {
                    let _ = writeln!(out, "    | {line}");
                }
            }
        }

        if self.status == BuildStatus::Failure {
            let _ = writeln!(out, "\n== Failure ==");
            if let Some(step) = &self.failed_step {
                let _ = writeln!(out, "  step:        {step}");
            }
            let _ = writeln!(out, "  tier:        {tier} on {}", self.metadata.platform);
            if let Some(category) = self.failure_category {
                let _ = writeln!(out, "  category:    {category} (exit {})", category.exit_code());
            }
            if let Some(error) = &self.error {
                let mut lines = error.lines();
                if let Some(first) = lines.next() {
                    let _ = writeln!(out, "  error:       {first}");
                }
                for line in lines {
                    let _ = writeln!(out, "               {line}");
                }
            }
            for violation in &self.violations {
                let _ = writeln!(out, "  - {violation}");
            }
            if let Some(remediation) = &self.remediation {
                let _ = writeln!(out, "  remediation: {remediation}");
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::ViolationSeverity;
    use crate::validate::CheckType;

    fn report(status: BuildStatus) -> BuildReport {
        BuildReport {
            status,
            tier: Some(TierName::Community),
            source: Some("vendored".to_string()),
            source_locator: Some("vendor/community".to_string()),
            artifact: None,
            validation: BTreeMap::new(),
            metadata: ReportMetadata {
                duration_seconds: 1.5,
                platform: "linux-x86_64".to_string(),
                source_revision: "abc123".to_string(),
                build_id: "b-1".to_string(),
            },
            failure_category: None,
            failed_step: None,
            remediation: None,
            error: None,
            violations: Vec::new(),
            source_attempts: Vec::new(),
            tools: Vec::new(),
        }
    }

    #[test]
    fn success_json_has_documented_shape() {
        let mut r = report(BuildStatus::Success);
        r.artifact = Some(ArtifactSummary {
            path: "dist/community-linux-x86_64/bundle.js".to_string(),
            sha256: "ab".repeat(32),
            size_bytes: 42,
        });
        r.set_validation(&[ValidationResult::pass(CheckType::Bom, "x", "3 components")]);

        let value: serde_json::Value = serde_json::from_str(&r.to_json().unwrap()).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["tier"], "community");
        assert_eq!(value["source"], "vendored");
        assert_eq!(value["artifact"]["sizeBytes"], 42);
        assert_eq!(value["validation"]["bom"]["passed"], true);
        assert_eq!(value["metadata"]["durationSeconds"], 1.5);
        assert_eq!(value["metadata"]["sourceRevision"], "abc123");
        assert!(value.get("failureCategory").is_none());
        assert_eq!(r.exit_code(), 0);
    }

    #[test]
    fn failure_renders_step_tier_and_remediation() {
        let mut r = report(BuildStatus::Failure);
        r.failure_category = Some(FailureCategory::Validation);
        r.failed_step = Some("compiled".to_string());
        r.error = Some("validation failed: 1 prohibited import".to_string());
        r.remediation = Some("remove the prohibited imports".to_string());
        r.violations.push(ImportViolation {
            file_path: "core/Dashboard.ext".to_string(),
            line_number: 12,
            import_statement: "import { Widget } from 'enterprise/Widget';".to_string(),
            prohibited_module: "enterprise/Widget".to_string(),
            feature_id: "widget".to_string(),
            severity: ViolationSeverity::Error,
        });

        let text = r.render_human();
        assert!(text.contains("== Failure =="));
        assert!(text.contains("step:        compiled"));
        assert!(text.contains("community on linux-x86_64"));
        assert!(text.contains("core/Dashboard.ext:12"));
        assert!(text.contains("remediation: remove the prohibited imports"));
        assert_eq!(r.exit_code(), 2);

        let value: serde_json::Value = serde_json::from_str(&r.to_json().unwrap()).unwrap();
        assert_eq!(value["status"], "failure");
        assert_eq!(value["failureCategory"], "validation");
        assert_eq!(value["violations"][0]["lineNumber"], 12);
    }
}
