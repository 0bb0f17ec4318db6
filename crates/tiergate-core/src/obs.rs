//! Structured observability hooks for build lifecycle events.
//!
//! This module provides:
//! - Build-scoped tracing spans via the `BuildSpan` RAII guard
//! - Emission functions for key lifecycle events, each with a stable `event` field
//!
//! Events are emitted at `info!` level unless they report a failure.

use tracing::{info, warn};

use crate::boundary::ImportViolation;
use crate::error::FailureCategory;
use crate::source::SourceType;

/// RAII guard that enters a build-scoped tracing span for one invocation.
///
/// # Example
///
/// ```ignore
/// let _span = BuildSpan::enter("b-1234", "community", "linux-x86_64");
/// // every event below carries build_id, tier and platform
/// ```
pub struct BuildSpan {
    _span: tracing::span::EnteredSpan,
}

impl BuildSpan {
    pub fn enter(build_id: &str, tier: &str, platform: &str) -> Self {
        let span = tracing::info_span!(
            "tiergate.build",
            build_id = %build_id,
            tier = %tier,
            platform = %platform
        );
        Self {
            _span: span.entered(),
        }
    }
}

/// Span for an async build. `tier` starts empty and is recorded once selected.
pub fn build_span(build_id: &str, platform: &str) -> tracing::Span {
    tracing::info_span!(
        "tiergate.build",
        build_id = %build_id,
        tier = tracing::field::Empty,
        platform = %platform
    )
}

/// Emit event: the build driver entered a new step.
pub fn emit_step_entered(step: &str) {
    info!(event = "build.step_entered", step = %step);
}

/// Emit event: the build stopped at `step`.
pub fn emit_build_failed(step: &str, category: FailureCategory, error: &dyn std::fmt::Display) {
    warn!(
        event = "build.failed",
        step = %step,
        category = %category,
        error = %error,
    );
}

/// Emit event: artifact produced, validated and promoted.
pub fn emit_build_completed(sha256: &str, size_bytes: u64, duration_ms: u64) {
    info!(
        event = "build.completed",
        sha256 = %sha256,
        size_bytes = size_bytes,
        duration_ms = duration_ms,
    );
}

/// Emit event: one dependency source probed.
pub fn emit_source_probed(source_type: SourceType, locator: &str, available: bool, elapsed_ms: u64) {
    info!(
        event = "source.probed",
        source = %source_type,
        locator = %locator,
        available = available,
        elapsed_ms = elapsed_ms,
    );
}

/// Emit event: a reference to a prohibited module was found.
pub fn emit_boundary_violation(violation: &ImportViolation) {
    if violation.is_error() {
        warn!(
            event = "boundary.violation",
            file = %violation.file_path,
            line = violation.line_number,
            module = %violation.prohibited_module,
            feature = %violation.feature_id,
            severity = %violation.severity,
        );
    } else {
        info!(
            event = "boundary.violation",
            file = %violation.file_path,
            line = violation.line_number,
            module = %violation.prohibited_module,
            feature = %violation.feature_id,
            severity = %violation.severity,
        );
    }
}

/// Emit event: one artifact check finished.
pub fn emit_validation_check(check: &str, passed: bool, hard_failure: bool) {
    info!(
        event = "validation.check",
        check = %check,
        passed = passed,
        hard_failure = hard_failure,
    );
}

/// Emit event: one CI matrix job exited.
pub fn emit_matrix_job_finished(
    tier: &str,
    platform: &str,
    exit_code: i32,
    category: Option<FailureCategory>,
    duration_ms: u64,
) {
    info!(
        event = "matrix.job_finished",
        tier = %tier,
        platform = %platform,
        exit_code = exit_code,
        category = category.map(|c| c.as_str()).unwrap_or("none"),
        duration_ms = duration_ms,
    );
}

/// Emit event: release gate evaluated across all matrix jobs.
pub fn emit_gate_evaluated(jobs: usize, failed: usize, passed: bool) {
    info!(
        event = "gate.evaluated",
        jobs = jobs,
        failed = failed,
        passed = passed,
    );
}
