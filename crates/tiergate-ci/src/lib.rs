//! Tiergate CI - matrix fan-out and release gating
//!
//! Provides the CI side of a dual-tier build:
//! - Plans (tier x platform) jobs with per-tier secret scoping
//! - Runs every job as an isolated `tiergate build --json` process in its
//!   own working copy of the checkout
//! - Aggregates per-job results into a stateless release-gate verdict
//! - Renders a CI workflow template with the same policy

pub mod gate;
pub mod matrix;
pub mod runner;
pub mod workflow;
pub mod worktree;

// Re-export key types
pub use gate::{GateVerdict, ReleaseGate};
pub use matrix::{CiMatrixJob, MatrixSpec};
pub use runner::{JobResult, JobRunner};
pub use workflow::render_workflow;
