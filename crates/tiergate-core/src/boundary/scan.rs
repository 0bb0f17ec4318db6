//! Pattern scans over source trees and compiled artifacts.

use std::path::Path;

use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use super::{BoundaryTable, CompiledBoundary, ImportViolation, ViolationSeverity};
use crate::artifact::is_bill_of_materials;
use crate::error::Result;
use crate::obs;
use crate::tier::BuildTier;

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &["node_modules", "target", "dist"];

/// Longest line excerpt stored in a violation.
const MAX_STATEMENT_LEN: usize = 200;

/// Violations found by one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub files_scanned: usize,
    pub violations: Vec<ImportViolation>,
}

impl ScanReport {
    pub fn errors(&self) -> impl Iterator<Item = &ImportViolation> {
        self.violations.iter().filter(|v| v.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ImportViolation> {
        self.violations.iter().filter(|v| !v.is_error())
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }
}

/// Scans text for references to modules the tier may not contain.
pub struct BoundaryScanner<'a> {
    table: &'a BoundaryTable,
    tier: BuildTier,
}

impl<'a> BoundaryScanner<'a> {
    pub fn new(table: &'a BoundaryTable, tier: BuildTier) -> Self {
        Self { table, tier }
    }

    /// Checkpoint 1: walk every file under `root`.
    ///
    /// Files inside a restricted module prefix are the restricted code itself
    /// and are skipped. Non-UTF-8 files are skipped. Paths in the report are
    /// relative to `root` with `/` separators.
    pub fn scan_sources(&self, root: &Path) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        if self.table.prohibited_for(self.tier).next().is_none() {
            return Ok(report);
        }

        for entry in WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e))
        {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let rel = relative_posix(root, entry.path());
            if let Some(owner) = self.table.owns_path(&rel) {
                debug!(file = %rel, feature = %owner.feature_id, "skipping restricted module file");
                continue;
            }

            let bytes = std::fs::read(entry.path())?;
            let Ok(text) = String::from_utf8(bytes) else {
                debug!(file = %rel, "skipping non-UTF-8 file");
                continue;
            };

            report.files_scanned += 1;
            report.violations.extend(self.scan_text(&rel, &text));
        }

        Ok(report)
    }

    /// Checkpoint 3: scan a compiled artifact (a file or a directory of
    /// files) for literal references to prohibited modules. Binary content is
    /// scanned lossily so embedded strings are still found. The `bom.json`
    /// at the top of a directory artifact is not part of the artifact.
    pub fn scan_artifact(&self, path: &Path) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        if self.table.prohibited_for(self.tier).next().is_none() {
            return Ok(report);
        }

        if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
                let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
                if !entry.file_type().is_file() || is_bill_of_materials(&entry) {
                    continue;
                }
                let rel = relative_posix(path, entry.path());
                let bytes = std::fs::read(entry.path())?;
                report.files_scanned += 1;
                report
                    .violations
                    .extend(self.scan_text(&rel, &String::from_utf8_lossy(&bytes)));
            }
        } else {
            let bytes = std::fs::read(path)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            report.files_scanned = 1;
            report.violations = self.scan_text(&name, &String::from_utf8_lossy(&bytes));
        }

        Ok(report)
    }

    /// One violation per pattern match, with 1-based line numbers.
    pub fn scan_text(&self, file_path: &str, text: &str) -> Vec<ImportViolation> {
        let prohibited: Vec<&CompiledBoundary> = self.table.prohibited_for(self.tier).collect();
        let mut violations = Vec::new();

        for (index, line) in text.lines().enumerate() {
            for compiled in &prohibited {
                for _ in compiled.pattern.find_iter(line) {
                    let violation = ImportViolation {
                        file_path: file_path.to_string(),
                        line_number: index + 1,
                        import_statement: excerpt(line),
                        prohibited_module: compiled.boundary.normalized_prefix().to_string(),
                        feature_id: compiled.boundary.feature_id.clone(),
                        severity: compiled.boundary.severity,
                    };
                    obs::emit_boundary_violation(&violation);
                    violations.push(violation);
                }
            }
        }

        violations
    }
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

fn relative_posix(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

fn excerpt(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() <= MAX_STATEMENT_LEN {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX_STATEMENT_LEN).collect();
    format!("{cut}…")
}

/// Severity counts, for log lines.
pub fn summarize(violations: &[ImportViolation]) -> (usize, usize) {
    let errors = violations
        .iter()
        .filter(|v| v.severity == ViolationSeverity::Error)
        .count();
    (errors, violations.len() - errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::FeatureBoundary;
    use crate::tier::TierName;

    fn table() -> BoundaryTable {
        BoundaryTable::new(vec![
            FeatureBoundary::new("widget", TierName::Enterprise, "enterprise/Widget"),
            FeatureBoundary::new("legacy-audit", TierName::Enterprise, "enterprise/audit")
                .with_severity(ViolationSeverity::Warning),
        ])
        .unwrap()
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn dashboard_source() -> String {
        let mut lines: Vec<String> = (1..=11).map(|i| format!("// line {i}")).collect();
        lines.push("import { Widget } from 'enterprise/Widget';".to_string());
        lines.push("export default Dashboard;".to_string());
        lines.join("\n")
    }

    #[test]
    fn reports_file_and_line_of_prohibited_import() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "core/Dashboard.ext", &dashboard_source());
        write(dir.path(), "core/Clean.ext", "import { Button } from 'core/Button';\n");

        let table = table();
        let report = BoundaryScanner::new(&table, BuildTier::community())
            .scan_sources(dir.path())
            .unwrap();

        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.violations.len(), 1);
        let v = &report.violations[0];
        assert_eq!(v.file_path, "core/Dashboard.ext");
        assert_eq!(v.line_number, 12);
        assert_eq!(v.severity, ViolationSeverity::Error);
        assert_eq!(v.prohibited_module, "enterprise/Widget");
        assert!(v.import_statement.contains("from 'enterprise/Widget'"));
    }

    #[test]
    fn one_violation_per_occurrence() {
        let table = table();
        let scanner = BoundaryScanner::new(&table, BuildTier::community());
        let text = "a = require('enterprise/Widget'); b = require('enterprise/Widget');\nclean\nimport 'enterprise/Widget'";
        let violations = scanner.scan_text("x.ext", text);
        assert_eq!(violations.len(), 3);
        assert_eq!(
            violations.iter().map(|v| v.line_number).collect::<Vec<_>>(),
            vec![1, 1, 3]
        );
    }

    #[test]
    fn warning_boundaries_do_not_block() {
        let table = table();
        let scanner = BoundaryScanner::new(&table, BuildTier::community());
        let violations = scanner.scan_text("x.ext", "import 'enterprise/audit/log'");
        assert_eq!(violations.len(), 1);
        assert!(!violations[0].is_error());
        assert_eq!(summarize(&violations), (0, 1));
    }

    #[test]
    fn enterprise_tier_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "core/Dashboard.ext", &dashboard_source());
        let table = table();
        let report = BoundaryScanner::new(&table, BuildTier::enterprise())
            .scan_sources(dir.path())
            .unwrap();
        assert!(report.violations.is_empty());
    }

    #[test]
    fn restricted_module_files_and_hidden_dirs_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "enterprise/Widget/index.ext",
            "export * from 'enterprise/Widget/impl';",
        );
        write(dir.path(), ".cache/x.ext", "import 'enterprise/Widget';");
        write(dir.path(), "node_modules/y/z.ext", "import 'enterprise/Widget';");

        let table = table();
        let report = BoundaryScanner::new(&table, BuildTier::community())
            .scan_sources(dir.path())
            .unwrap();
        assert!(report.violations.is_empty());
        assert_eq!(report.files_scanned, 0);
    }

    #[test]
    fn artifact_scan_finds_string_built_references() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("bundle.js");
        std::fs::write(
            &bundle,
            "var m=\"ok\";\nvar n=load(\"enterprise/\"+\"x\");\nvar p=load(\"enterprise/Widget\");\n",
        )
        .unwrap();

        let table = table();
        let report = BoundaryScanner::new(&table, BuildTier::community())
            .scan_artifact(&bundle)
            .unwrap();
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.violations[0].file_path, "bundle.js");
        assert_eq!(report.violations[0].line_number, 3);
    }

    #[test]
    fn directory_artifact_scan_skips_bill_of_materials() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bundle.js", "var ok = 1;\n");
        write(dir.path(), "bom.json", "{ \"note\": \"enterprise/Widget\" }\n");
        write(dir.path(), "chunks/2.js", "load('enterprise/Widget');\n");

        let table = table();
        let report = BoundaryScanner::new(&table, BuildTier::community())
            .scan_artifact(dir.path())
            .unwrap();
        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.violations[0].file_path, "chunks/2.js");
    }

    #[test]
    fn long_lines_are_truncated() {
        let long = format!("import 'enterprise/Widget'; {}", "x".repeat(500));
        let table = table();
        let violations = BoundaryScanner::new(&table, BuildTier::community()).scan_text("a", &long);
        assert!(violations[0].import_statement.chars().count() <= MAX_STATEMENT_LEN + 1);
    }
}
