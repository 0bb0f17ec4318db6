//! The five artifact checks.

use std::collections::BTreeMap;

use serde_json::json;

use super::{CheckSeverity, CheckType, DeterminismLedger, SizeBaseline, ValidationContext, ValidationResult};
use crate::artifact::BuildArtifact;
use crate::bom::BillOfMaterials;
use crate::boundary::BoundaryScanner;
use crate::git::{is_recorded_revision, UNKNOWN_REVISION};
use crate::manifest::license_allowed;
use crate::tier::BuildTier;

fn artifact_ref(artifact: &BuildArtifact) -> String {
    artifact.path.display().to_string()
}

fn short(sha: &str) -> &str {
    &sha[..sha.len().min(12)]
}

/// Post-build scan of the compiled output. Advisory for tiers allowed to
/// reference restricted modules.
pub fn imports(ctx: &ValidationContext<'_>, artifact: &BuildArtifact, tier: BuildTier) -> ValidationResult {
    let r = artifact_ref(artifact);

    if !tier.is_community() {
        let advisory = BoundaryScanner::new(ctx.boundaries, BuildTier::community());
        return match advisory.scan_artifact(&artifact.path) {
            Ok(report) => ValidationResult::pass(
                CheckType::Imports,
                &r,
                format!(
                    "advisory for {tier}: {} references to restricted modules",
                    report.violations.len()
                ),
            )
            .with_details(json!(report.violations)),
            Err(e) => ValidationResult::pass(
                CheckType::Imports,
                &r,
                format!("advisory scan skipped: {e}"),
            )
            .with_severity(CheckSeverity::Warning),
        };
    }

    match BoundaryScanner::new(ctx.boundaries, tier).scan_artifact(&artifact.path) {
        Err(e) => ValidationResult::fail(
            CheckType::Imports,
            &r,
            CheckSeverity::Error,
            format!("cannot scan artifact: {e}"),
        ),
        Ok(report) if report.has_errors() => ValidationResult::fail(
            CheckType::Imports,
            &r,
            CheckSeverity::Error,
            format!("{} prohibited module references in artifact", report.error_count()),
        )
        .with_details(json!(report.violations)),
        Ok(report) if !report.violations.is_empty() => ValidationResult::pass(
            CheckType::Imports,
            &r,
            format!("{} warning-severity references", report.violations.len()),
        )
        .with_severity(CheckSeverity::Warning)
        .with_details(json!(report.violations)),
        Ok(report) => ValidationResult::pass(
            CheckType::Imports,
            &r,
            format!("no prohibited references in {} file(s)", report.files_scanned),
        ),
    }
}

/// Every dependency license on the allow-list; informational for enterprise.
pub fn licenses(ctx: &ValidationContext<'_>, artifact: &BuildArtifact, tier: BuildTier) -> ValidationResult {
    let r = artifact_ref(artifact);

    let declared: BTreeMap<String, Option<String>> = match ctx.manifest {
        Some(manifest) => manifest
            .dependencies
            .keys()
            .map(|name| (name.clone(), manifest.licenses.get(name).cloned()))
            .collect(),
        None => {
            let bom = artifact
                .bill_of_materials_path
                .as_deref()
                .map(BillOfMaterials::read);
            match bom {
                Some(Ok(bom)) => bom.licenses(),
                Some(Err(e)) => return no_license_data(&r, tier, &e.to_string()),
                None => return no_license_data(&r, tier, "no manifest or bill of materials"),
            }
        }
    };

    let offenders: Vec<(String, String)> = declared
        .into_iter()
        .filter_map(|(name, license)| match license {
            Some(expr) if license_allowed(&expr, &ctx.licenses.allowed) => None,
            Some(expr) => Some((name, expr)),
            None => Some((name, "undeclared".to_string())),
        })
        .collect();

    if offenders.is_empty() {
        return ValidationResult::pass(CheckType::Licenses, &r, "all licenses on the allow-list");
    }

    let listed = offenders
        .iter()
        .map(|(name, license)| format!("{name} ({license})"))
        .collect::<Vec<_>>()
        .join(", ");
    let details = json!(offenders
        .iter()
        .map(|(name, license)| json!({ "name": name, "license": license }))
        .collect::<Vec<_>>());

    if tier.is_community() {
        ValidationResult::fail(
            CheckType::Licenses,
            &r,
            CheckSeverity::Error,
            format!("{} dependencies outside the allow-list: {listed}", offenders.len()),
        )
        .with_details(details)
    } else {
        ValidationResult::pass(
            CheckType::Licenses,
            &r,
            format!("informational: {} dependencies outside the allow-list: {listed}", offenders.len()),
        )
        .with_details(details)
    }
}

fn no_license_data(r: &str, tier: BuildTier, reason: &str) -> ValidationResult {
    let message = format!("no license data: {reason}");
    if tier.is_community() {
        ValidationResult::fail(CheckType::Licenses, r, CheckSeverity::Error, message)
    } else {
        ValidationResult::pass(CheckType::Licenses, r, message).with_severity(CheckSeverity::Warning)
    }
}

/// Artifact size against the recorded baseline.
pub fn size(ctx: &ValidationContext<'_>, artifact: &BuildArtifact) -> ValidationResult {
    let r = artifact_ref(artifact);
    let Some(state_dir) = ctx.state_dir else {
        return ValidationResult::pass(CheckType::Size, &r, "size baseline not tracked");
    };

    let baseline = match SizeBaseline::load(state_dir) {
        Ok(baseline) => baseline,
        Err(e) => {
            return ValidationResult::fail(
                CheckType::Size,
                &r,
                CheckSeverity::Warning,
                format!("cannot read size baseline: {e}"),
            )
        }
    };

    let Some(base) = baseline.get(artifact.tier, &artifact.platform) else {
        return ValidationResult::pass(
            CheckType::Size,
            &r,
            format!(
                "no baseline for {}/{}; {} bytes",
                artifact.tier, artifact.platform, artifact.size_bytes
            ),
        );
    };

    let limit = (base as u128 * ctx.size_budget_percent as u128 / 100) as u64;
    let details = json!({
        "sizeBytes": artifact.size_bytes,
        "baselineBytes": base,
        "budgetPercent": ctx.size_budget_percent,
    });

    if artifact.size_bytes <= limit {
        ValidationResult::pass(
            CheckType::Size,
            &r,
            format!(
                "{} bytes within {}% of baseline {base}",
                artifact.size_bytes, ctx.size_budget_percent
            ),
        )
        .with_details(details)
    } else {
        let severity = if ctx.size_hard_fail {
            CheckSeverity::Error
        } else {
            CheckSeverity::Warning
        };
        ValidationResult::fail(
            CheckType::Size,
            &r,
            severity,
            format!(
                "{} bytes exceeds {}% of baseline {base} bytes",
                artifact.size_bytes, ctx.size_budget_percent
            ),
        )
        .with_details(details)
    }
}

/// Identical inputs must give an identical hash. Hard for community,
/// warning for enterprise.
pub fn determinism(ctx: &ValidationContext<'_>, artifact: &BuildArtifact, tier: BuildTier) -> ValidationResult {
    let r = artifact_ref(artifact);
    let severity = if tier.is_community() {
        CheckSeverity::Error
    } else {
        CheckSeverity::Warning
    };

    if let Some(rebuild) = ctx.rebuild_sha256 {
        if rebuild != artifact.sha256 {
            return ValidationResult::fail(
                CheckType::Determinism,
                &r,
                severity,
                format!(
                    "rebuild from identical inputs produced {} instead of {}",
                    short(rebuild),
                    short(&artifact.sha256)
                ),
            )
            .with_details(json!({ "expected": artifact.sha256, "rebuild": rebuild }));
        }
    }

    if artifact.source_revision == UNKNOWN_REVISION {
        return ValidationResult::pass(
            CheckType::Determinism,
            &r,
            "source revision unknown; ledger comparison skipped",
        );
    }
    if !is_recorded_revision(&artifact.source_revision) {
        return ValidationResult::pass(
            CheckType::Determinism,
            &r,
            format!(
                "{} has uncommitted changes; ledger comparison skipped",
                artifact.source_revision
            ),
        );
    }
    let Some(state_dir) = ctx.state_dir else {
        return ValidationResult::pass(CheckType::Determinism, &r, "no determinism ledger");
    };

    let ledger = match DeterminismLedger::load(state_dir) {
        Ok(ledger) => ledger,
        Err(e) => {
            return ValidationResult::fail(
                CheckType::Determinism,
                &r,
                CheckSeverity::Warning,
                format!("cannot read determinism ledger: {e}"),
            )
        }
    };

    let key = DeterminismLedger::key(&artifact.source_revision, artifact.tier, &artifact.platform);
    match ledger.get(&artifact.source_revision, artifact.tier, &artifact.platform) {
        None => ValidationResult::pass(
            CheckType::Determinism,
            &r,
            format!("first build recorded for {key}"),
        ),
        Some(entry) if entry.sha256 == artifact.sha256 => ValidationResult::pass(
            CheckType::Determinism,
            &r,
            format!("hash {} matches the recorded build", short(&artifact.sha256)),
        ),
        Some(entry) => ValidationResult::fail(
            CheckType::Determinism,
            &r,
            severity,
            format!(
                "hash {} differs from {} recorded for {key}",
                short(&artifact.sha256),
                short(&entry.sha256)
            ),
        )
        .with_details(json!({ "expected": entry.sha256, "actual": artifact.sha256 })),
    }
}

/// The bill of materials must exist and parse.
pub fn bom(artifact: &BuildArtifact) -> ValidationResult {
    let r = artifact_ref(artifact);
    let Some(path) = artifact.bill_of_materials_path.as_deref() else {
        return ValidationResult::fail(
            CheckType::Bom,
            &r,
            CheckSeverity::Error,
            "no bill of materials recorded for the artifact",
        );
    };
    if !path.is_file() {
        return ValidationResult::fail(
            CheckType::Bom,
            &r,
            CheckSeverity::Error,
            format!("bill of materials {} is missing", path.display()),
        );
    }

    match BillOfMaterials::read(path) {
        Ok(bom) if bom.tier != artifact.tier => ValidationResult::fail(
            CheckType::Bom,
            &r,
            CheckSeverity::Error,
            format!(
                "bill of materials describes tier {} but the artifact is {}",
                bom.tier, artifact.tier
            ),
        ),
        Ok(bom) => ValidationResult::pass(
            CheckType::Bom,
            &r,
            format!("{} components in {}", bom.components.len(), path.display()),
        ),
        Err(e) => ValidationResult::fail(
            CheckType::Bom,
            &r,
            CheckSeverity::Error,
            format!("bill of materials {} is invalid: {e}", path.display()),
        ),
    }
}
