//! Release gate evaluation over finished matrix jobs.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tiergate_core::{obs, TierName};

use crate::runner::JobResult;

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,

    pub evaluated_at: DateTime<Utc>,
}

/// Stateless aggregation rules. Reads only the per-job results it is given.
#[derive(Debug, Clone, Copy)]
pub struct ReleaseGate {
    require_all_tiers: bool,
}

impl ReleaseGate {
    /// Every scheduled job must pass and both tiers must be covered.
    pub fn release() -> Self {
        Self {
            require_all_tiers: true,
        }
    }

    /// Every scheduled job must pass; tier coverage is not required.
    ///
    /// Used for external contributions, which never schedule enterprise jobs.
    pub fn checks_only() -> Self {
        Self {
            require_all_tiers: false,
        }
    }

    /// Evaluate the gate.
    ///
    /// Gate rule:
    /// - At least one job was scheduled
    /// - Every job exited `0`
    /// - No job ran outside its secret and contribution scope
    /// - For a release, both tiers have at least one job
    pub fn evaluate(&self, results: &[JobResult]) -> GateVerdict {
        let mut violations = Vec::new();

        if results.is_empty() {
            violations.push("no matrix jobs were scheduled".to_string());
        }

        for result in results {
            violations.extend(result.job.scope_violations());
            if !result.passed() {
                violations.push(result.attribution());
            }
        }

        if self.require_all_tiers {
            let covered: BTreeSet<TierName> = results.iter().map(|r| r.job.tier).collect();
            for tier in TierName::ALL {
                if !covered.contains(&tier) {
                    violations.push(format!("no {tier} job was scheduled"));
                }
            }
        }

        let failed = results.iter().filter(|r| !r.passed()).count();
        let passed = violations.is_empty();
        let message = if passed {
            format!("all {} matrix jobs passed", results.len())
        } else {
            format!(
                "{failed} of {} matrix jobs failed, {} gate violation(s)",
                results.len(),
                violations.len()
            )
        };

        obs::emit_gate_evaluated(results.len(), failed, passed);

        GateVerdict {
            passed,
            violations,
            message,
            evaluated_at: Utc::now(),
        }
    }
}
