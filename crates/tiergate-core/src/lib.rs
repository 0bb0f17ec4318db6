//! Tiergate Core Library
//!
//! Dual-tier build orchestration: tier selection, dependency source
//! resolution, manifest licensing rules, feature boundary enforcement,
//! artifact validation and the build driver that sequences them.

pub mod artifact;
pub mod bom;
pub mod boundary;
pub mod config;
pub mod driver;
pub mod error;
pub mod fsutil;
pub mod git;
pub mod manifest;
pub mod obs;
pub mod project;
pub mod report;
pub mod source;
pub mod telemetry;
pub mod tier;
pub mod toolchain;
pub mod validate;

pub use artifact::{hash_path, BuildArtifact};

pub use bom::{BillOfMaterials, BomComponent, BOM_FILE, BOM_SCHEMA};

pub use boundary::{
    BoundaryScanner, BoundaryTable, BundlerExclusions, FeatureBoundary, ImportViolation,
    ScanReport, ViolationSeverity,
};

pub use config::{EngineConfig, ExternalCommand, LicensePolicy, CONFIG_ENV_VAR, CONFIG_FILE};

pub use driver::{host_platform, BuildDriver, BuildFailure, BuildOutcome, BuildRequest, BuildStep};

pub use error::{FailureCategory, Result, TiergateError};

pub use git::{capture_head_sha, is_recorded_revision, DIRTY_SUFFIX, UNKNOWN_REVISION};

pub use manifest::{ManifestLoader, PackageManifest};

pub use project::Project;

pub use report::{BuildReport, BuildStatus};

pub use source::{
    Credentials, DefaultProbe, DependencySource, ProbeFailure, SourceAttempt, SourceProbe,
    SourceResolver, SourceSelection, SourceType, StaticProbe,
};

pub use tier::{select_tier, BuildTier, TierName, TIER_ENV_VAR};

pub use validate::{
    ArtifactValidator, CheckSeverity, CheckType, ValidationContext, ValidationResult,
};
