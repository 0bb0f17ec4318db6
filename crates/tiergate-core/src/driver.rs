//! Build Driver: one strictly sequential build attempt.
//!
//! ```text
//! Init -> TierSelected -> ManifestLoaded -> DependenciesResolved
//!      -> PackagesInstalled -> Compiled -> Validated -> Complete
//! ```
//!
//! Any step may fail; the failure records the step that was being attempted.
//! Output is staged in `<tier>-<platform>.partial/` and only renamed into
//! place after validation passes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::artifact::{hash_path, BuildArtifact};
use crate::bom::{BillOfMaterials, BOM_FILE};
use crate::boundary::scan::summarize;
use crate::boundary::{BoundaryScanner, BundlerExclusions, ImportViolation, EXTERNALS_ENV_VAR};
use crate::config::ExternalCommand;
use crate::error::{Result, TiergateError};
use crate::git::{self, UNKNOWN_REVISION};
use crate::manifest::{ManifestLoader, PackageManifest};
use crate::obs;
use crate::project::Project;
use crate::report::{ArtifactSummary, BuildReport, BuildStatus, ReportMetadata, ToolSummary};
use crate::source::{
    Credentials, DefaultProbe, DependencySource, ResolvedSource, SourceProbe, SourceResolver,
    SourceSelection,
};
use crate::tier::{select_tier, BuildTier};
use crate::toolchain::{run_tool, Placeholders, ToolOutput};
use crate::validate::{
    ArtifactValidator, CheckType, DeterminismLedger, SizeBaseline, ValidationContext,
    ValidationResult,
};

/// Artifact type recorded for compiler output.
pub const ARTIFACT_TYPE: &str = "bundle";

/// Suffix of the staging directory.
pub const PARTIAL_SUFFIX: &str = ".partial";

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuildStep {
    Init,
    TierSelected,
    ManifestLoaded,
    DependenciesResolved,
    PackagesInstalled,
    Compiled,
    Validated,
    Complete,
}

impl BuildStep {
    pub const SEQUENCE: [BuildStep; 8] = [
        BuildStep::Init,
        BuildStep::TierSelected,
        BuildStep::ManifestLoaded,
        BuildStep::DependenciesResolved,
        BuildStep::PackagesInstalled,
        BuildStep::Compiled,
        BuildStep::Validated,
        BuildStep::Complete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BuildStep::Init => "init",
            BuildStep::TierSelected => "tier_selected",
            BuildStep::ManifestLoaded => "manifest_loaded",
            BuildStep::DependenciesResolved => "dependencies_resolved",
            BuildStep::PackagesInstalled => "packages_installed",
            BuildStep::Compiled => "compiled",
            BuildStep::Validated => "validated",
            BuildStep::Complete => "complete",
        }
    }

    /// What the driver is doing while moving into this step.
    pub fn activity(self) -> &'static str {
        match self {
            BuildStep::Init => "starting",
            BuildStep::TierSelected => "selecting the build tier",
            BuildStep::ManifestLoaded => "loading and validating the manifest",
            BuildStep::DependenciesResolved => "resolving the dependency source",
            BuildStep::PackagesInstalled => "installing packages",
            BuildStep::Compiled => "compiling",
            BuildStep::Validated => "validating the artifact",
            BuildStep::Complete => "promoting the build output",
        }
    }

    pub fn next(self) -> Option<BuildStep> {
        let index = Self::SEQUENCE.iter().position(|s| *s == self)?;
        Self::SEQUENCE.get(index + 1).copied()
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

/// Inputs of one `build` invocation.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub tier_flag: Option<String>,
    pub env_tier: Option<String>,
    /// `auto`, `registry`, `vendored` or `cdn`; `None` means auto.
    pub source: Option<String>,
    pub debug: bool,
    /// Defaults to the host `<os>-<arch>`.
    pub platform: Option<String>,
    /// Defaults to `git rev-parse HEAD` (`-dirty` for uncommitted changes),
    /// then `unknown`.
    pub revision: Option<String>,
    /// Overrides `[project].output_dir`.
    pub output_dir: Option<PathBuf>,
    pub update_baseline: bool,
    /// Defaults to the commit timestamp, then `0`.
    pub source_date_epoch: Option<i64>,
}

impl BuildRequest {
    pub fn for_tier(tier: &str) -> Self {
        Self {
            tier_flag: Some(tier.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub struct BuildOutcome {
    pub artifact: BuildArtifact,
    pub validation: Vec<ValidationResult>,
    pub report: BuildReport,
}

#[derive(Debug)]
pub struct BuildFailure {
    /// The step that was being attempted.
    pub step: BuildStep,
    pub error: TiergateError,
    pub report: BuildReport,
}

impl BuildFailure {
    /// A failure raised before the driver ran, such as an unreadable project.
    pub fn before_start(error: TiergateError, request: &BuildRequest) -> Self {
        let progress = Progress::new(
            Uuid::new_v4().to_string(),
            request.platform.clone().unwrap_or_else(host_platform),
            request
                .revision
                .clone()
                .unwrap_or_else(|| UNKNOWN_REVISION.to_string()),
            request.debug,
        );
        let mut report = progress.failure_report(&error);
        report.failed_step = Some(BuildStep::Init.as_str().to_string());
        obs::emit_build_failed(BuildStep::Init.as_str(), error.category(), &error);
        Self {
            step: BuildStep::Init,
            error,
            report,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "build failed while {}: {}", self.step.activity(), self.error)
    }
}

impl std::error::Error for BuildFailure {}

pub fn host_platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

// ---------------------------------------------------------------------------
// Per-invocation progress
// ---------------------------------------------------------------------------

struct Progress {
    build_id: String,
    platform: String,
    revision: String,
    started: Instant,
    reached: BuildStep,
    tier: Option<BuildTier>,
    resolved: Option<ResolvedSource>,
    artifact: Option<BuildArtifact>,
    validation: Vec<ValidationResult>,
    tools: Vec<ToolSummary>,
    debug: bool,
}

impl Progress {
    fn new(build_id: String, platform: String, revision: String, debug: bool) -> Self {
        Self {
            build_id,
            platform,
            revision,
            started: Instant::now(),
            reached: BuildStep::Init,
            tier: None,
            resolved: None,
            artifact: None,
            validation: Vec::new(),
            tools: Vec::new(),
            debug,
        }
    }

    fn attempting(&self) -> BuildStep {
        self.reached.next().unwrap_or(BuildStep::Complete)
    }

    fn reach(&mut self, step: BuildStep) {
        self.reached = step;
        obs::emit_step_entered(step.as_str());
    }

    fn record_tool(&mut self, output: &ToolOutput) {
        if self.debug {
            self.tools.push(ToolSummary {
                tool: output.tool.clone(),
                command: output.command.clone(),
                duration_ms: output.duration_ms,
                stdout: output.stdout.clone(),
            });
        }
    }

    fn report(&self, status: BuildStatus) -> BuildReport {
        let mut report = BuildReport {
            status,
            tier: self.tier.map(|t| t.name()),
            source: self
                .resolved
                .as_ref()
                .map(|r| r.source.source_type.to_string()),
            source_locator: self.resolved.as_ref().map(|r| r.source.locator.clone()),
            artifact: self.artifact.as_ref().map(|a| ArtifactSummary {
                path: a.path.display().to_string(),
                sha256: a.sha256.clone(),
                size_bytes: a.size_bytes,
            }),
            validation: Default::default(),
            metadata: ReportMetadata {
                duration_seconds: self.started.elapsed().as_secs_f64(),
                platform: self.platform.clone(),
                source_revision: self.revision.clone(),
                build_id: self.build_id.clone(),
            },
            failure_category: None,
            failed_step: None,
            remediation: None,
            error: None,
            violations: Vec::new(),
            source_attempts: self
                .resolved
                .as_ref()
                .map(|r| r.attempts.clone())
                .unwrap_or_default(),
            tools: self.tools.clone(),
        };
        report.set_validation(&self.validation);
        report
    }

    fn failure_report(&self, error: &TiergateError) -> BuildReport {
        let mut report = self.report(BuildStatus::Failure);
        report.failure_category = Some(error.category());
        report.failed_step = Some(self.attempting().as_str().to_string());
        report.remediation = Some(error.remediation());
        report.error = Some(error.to_string());
        match error {
            TiergateError::Validation { violations, .. } => {
                report.violations = violations.clone();
            }
            TiergateError::Dependency { attempts, .. } => {
                report.source_attempts = attempts.clone();
            }
            _ => {}
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Sequences tier selection, manifest validation, source resolution, the
/// external tools and artifact validation for one project.
pub struct BuildDriver<'a> {
    project: &'a Project,
    probe: Option<&'a dyn SourceProbe>,
    credentials: Option<Credentials>,
}

impl<'a> BuildDriver<'a> {
    pub fn new(project: &'a Project) -> Self {
        Self {
            project,
            probe: None,
            credentials: None,
        }
    }

    /// Replace the default network/filesystem probe.
    pub fn with_probe(mut self, probe: &'a dyn SourceProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Credentials to use instead of reading each source's `auth_env`.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub async fn build(&self, request: &BuildRequest) -> std::result::Result<BuildOutcome, Box<BuildFailure>> {
        let build_id = Uuid::new_v4().to_string();
        let platform = request.platform.clone().unwrap_or_else(host_platform);
        let revision = request
            .revision
            .clone()
            .or_else(|| self.project.source_revision())
            .unwrap_or_else(|| UNKNOWN_REVISION.to_string());

        let span = obs::build_span(&build_id, &platform);
        let mut progress = Progress::new(build_id, platform, revision, request.debug);

        let result = self
            .execute(&mut progress, request, &span)
            .instrument(span.clone())
            .await;

        let _entered = span.enter();
        match result {
            Ok((artifact, validation)) => {
                let report = progress.report(BuildStatus::Success);
                obs::emit_build_completed(
                    &artifact.sha256,
                    artifact.size_bytes,
                    progress.started.elapsed().as_millis() as u64,
                );
                Ok(BuildOutcome {
                    artifact,
                    validation,
                    report,
                })
            }
            Err(error) => {
                let step = progress.attempting();
                obs::emit_build_failed(step.as_str(), error.category(), &error);
                let report = progress.failure_report(&error);
                Err(Box::new(BuildFailure {
                    step,
                    error,
                    report,
                }))
            }
        }
    }

    async fn execute(
        &self,
        progress: &mut Progress,
        request: &BuildRequest,
        span: &tracing::Span,
    ) -> Result<(BuildArtifact, Vec<ValidationResult>)> {
        let project = self.project;
        let config = &project.config;
        progress.reach(BuildStep::Init);

        // Tier and source selection.
        let tier = select_tier(request.tier_flag.as_deref(), request.env_tier.as_deref())?;
        let selection = match request.source.as_deref() {
            Some(value) => SourceSelection::from_str(value)?,
            None => SourceSelection::Auto,
        };
        progress.tier = Some(tier);
        span.record("tier", tier.name().as_str());
        info!(tier = %tier, source = %selection, platform = %progress.platform, "build started");
        progress.reach(BuildStep::TierSelected);

        // Manifest.
        let loader = ManifestLoader::new(&config.licenses)?;
        let mut manifest = loader.load(tier, &project.manifest_path(tier))?;
        loader.validate(&mut manifest)?;
        progress.reach(BuildStep::ManifestLoaded);

        // Dependency source.
        let sources = &project.policy(tier).sources;
        let credentials = self
            .credentials
            .clone()
            .unwrap_or_else(|| Credentials::from_env(sources.iter()));
        let timeout = Duration::from_secs(config.validation.probe_timeout_secs);
        let default_probe;
        let probe: &dyn SourceProbe = match self.probe {
            Some(probe) => probe,
            None => {
                default_probe =
                    DefaultProbe::new(project.root.clone(), credentials.clone(), timeout)?;
                &default_probe
            }
        };
        let resolved = SourceResolver::new(probe)
            .with_timeout(timeout)
            .resolve(&tier, sources, selection)
            .await?;
        let source = resolved.source.clone();
        progress.resolved = Some(resolved);
        progress.reach(BuildStep::DependenciesResolved);

        // Install.
        let install_manifest = project.install_manifest();
        loader.materialize(&manifest, &install_manifest)?;
        if let Some(install) = &config.toolchain.install {
            let env = install_env(tier, &source, &credentials, &install_manifest);
            let placeholders = Placeholders::new()
                .set("tier", tier.name().as_str())
                .set("platform", progress.platform.clone())
                .set("source", source.locator.clone());
            let output = run_tool("install", install, &placeholders, &project.root, &env).await?;
            progress.record_tool(&output);
        } else {
            debug!("no install step configured");
        }
        progress.reach(BuildStep::PackagesInstalled);

        // Compile: pre-build scan, exclusions, compiler.
        let output_root = request
            .output_dir
            .as_ref()
            .map(|p| project.resolve(p))
            .unwrap_or_else(|| project.output_dir());
        let platform = progress.platform.clone();
        let final_dir = output_root.join(format!("{tier}-{platform}"));
        let staging = output_root.join(format!("{tier}-{platform}{PARTIAL_SUFFIX}"));
        prepare_staging(&staging)?;

        pre_build_scan(project, tier)?;

        let state_dir = project.state_dir();
        let exclusions = BundlerExclusions::for_tier(&project.boundaries, tier);
        let externals_path = BundlerExclusions::path_in(&state_dir, tier, &platform);
        exclusions.write(&externals_path)?;
        if !exclusions.is_empty() {
            info!(externals = exclusions.externals.len(), "bundler exclusions written");
        }

        let compile = config.toolchain.compile.as_ref().ok_or_else(|| {
            TiergateError::config("no [toolchain.compile] command configured")
        })?;
        let epoch = request
            .source_date_epoch
            .or_else(|| git::commit_timestamp(&project.root))
            .unwrap_or(0);
        let compile_run = CompileRun {
            command: compile,
            tier,
            platform: &platform,
            source: &source,
            externals: &externals_path,
            epoch,
            root: &project.root,
        };
        let output = compile_run.run(&staging).await?;
        progress.record_tool(&output);

        let artifact_path = staging.join(&config.project.artifact_name);
        if !artifact_path.is_file() {
            return Err(TiergateError::Build {
                tool: "compile".to_string(),
                command: output.command,
                exit_code: output.exit_code,
                stderr: format!(
                    "{}expected output {} was not written",
                    output.stderr,
                    artifact_path.display()
                ),
            });
        }

        let rebuild_sha256 = if config.validation.verify_rebuild {
            let scratch = tempfile::Builder::new()
                .prefix(".tiergate-rebuild-")
                .tempdir_in(&output_root)?;
            compile_run.run(scratch.path()).await?;
            let (sha, _) = hash_path(&scratch.path().join(&config.project.artifact_name))?;
            debug!(rebuild = %sha, "verification rebuild finished");
            Some(sha)
        } else {
            None
        };
        progress.reach(BuildStep::Compiled);

        // Validate.
        let bom_path = staging.join(BOM_FILE);
        BillOfMaterials::from_manifest(&manifest, &progress.platform, &progress.revision)
            .write(&bom_path)?;
        let mut artifact = BuildArtifact::from_file(
            ARTIFACT_TYPE,
            tier.name(),
            &progress.platform,
            &artifact_path,
            &progress.revision,
            Some(bom_path),
        )?;
        progress.artifact = Some(artifact.clone());

        let validation = validate_artifact(
            project,
            &manifest,
            &state_dir,
            rebuild_sha256.as_deref(),
            &artifact,
            tier,
        );
        progress.validation = validation.clone();
        check_hard_failures(&validation)?;
        progress.reach(BuildStep::Validated);

        // Promote and record.
        if final_dir.exists() {
            std::fs::remove_dir_all(&final_dir)?;
        }
        std::fs::rename(&staging, &final_dir)?;
        artifact.relocate(&staging, &final_dir);
        progress.artifact = Some(artifact.clone());

        record_state(&state_dir, &artifact, request.update_baseline)?;
        progress.reach(BuildStep::Complete);
        info!(
            artifact = %artifact.path.display(),
            sha256 = %artifact.short_sha(),
            size_bytes = artifact.size_bytes,
            "build complete"
        );

        Ok((artifact, validation))
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

fn install_env(
    tier: BuildTier,
    source: &DependencySource,
    credentials: &Credentials,
    install_manifest: &Path,
) -> Vec<(String, String)> {
    let mut env = vec![
        ("TIERGATE_TIER".to_string(), tier.name().to_string()),
        ("TIERGATE_SOURCE_TYPE".to_string(), source.source_type.to_string()),
        ("TIERGATE_SOURCE_LOCATOR".to_string(), source.locator.clone()),
        (
            "TIERGATE_INSTALL_MANIFEST".to_string(),
            install_manifest.display().to_string(),
        ),
    ];
    if source.requires_auth {
        if let Some(auth_env) = &source.auth_env {
            if let Some(token) = credentials.get(auth_env) {
                env.push((auth_env.clone(), token.to_string()));
            }
        }
    }
    env
}

/// Remove a stale staging directory and create a fresh one.
fn prepare_staging(staging: &Path) -> Result<()> {
    if staging.exists() {
        warn!(path = %staging.display(), "removing stale partial output");
        std::fs::remove_dir_all(staging)?;
    }
    std::fs::create_dir_all(staging)?;
    Ok(())
}

/// Checkpoint 1. Error-severity violations abort the build.
fn pre_build_scan(project: &Project, tier: BuildTier) -> Result<()> {
    let root = project.community_root();
    if !root.is_dir() {
        return Err(TiergateError::config(format!(
            "community source root {} not found",
            root.display()
        )));
    }

    let report = BoundaryScanner::new(&project.boundaries, tier).scan_sources(&root)?;
    let (errors, warnings) = summarize(&report.violations);
    info!(
        files = report.files_scanned,
        errors,
        warnings,
        "pre-build boundary scan finished"
    );
    if errors == 0 {
        return Ok(());
    }

    let violations: Vec<ImportViolation> = report.errors().cloned().collect();
    Err(TiergateError::Validation {
        summary: format!("{errors} prohibited import(s) in {tier} sources"),
        violations,
        failed_checks: vec![CheckType::Imports.as_str().to_string()],
    })
}

struct CompileRun<'r> {
    command: &'r ExternalCommand,
    tier: BuildTier,
    platform: &'r str,
    source: &'r DependencySource,
    externals: &'r Path,
    epoch: i64,
    root: &'r Path,
}

impl CompileRun<'_> {
    async fn run(&self, out_dir: &Path) -> Result<ToolOutput> {
        let placeholders = Placeholders::new()
            .set("tier", self.tier.name().as_str())
            .set("platform", self.platform)
            .set("out_dir", out_dir.display().to_string())
            .set("externals", self.externals.display().to_string())
            .set("source", self.source.locator.clone());
        let env = vec![
            ("TIERGATE_TIER".to_string(), self.tier.name().to_string()),
            ("TIERGATE_PLATFORM".to_string(), self.platform.to_string()),
            ("TIERGATE_OUT_DIR".to_string(), out_dir.display().to_string()),
            (EXTERNALS_ENV_VAR.to_string(), self.externals.display().to_string()),
            ("TIERGATE_SOURCE_TYPE".to_string(), self.source.source_type.to_string()),
            ("SOURCE_DATE_EPOCH".to_string(), self.epoch.to_string()),
        ];
        run_tool("compile", self.command, &placeholders, self.root, &env).await
    }
}

fn validate_artifact(
    project: &Project,
    manifest: &PackageManifest,
    state_dir: &Path,
    rebuild_sha256: Option<&str>,
    artifact: &BuildArtifact,
    tier: BuildTier,
) -> Vec<ValidationResult> {
    let config = &project.config;
    let mut ctx = ValidationContext::new(&project.boundaries, &config.licenses)
        .with_config(&config.validation)
        .with_manifest(manifest)
        .with_state_dir(state_dir);
    if let Some(sha) = rebuild_sha256 {
        ctx = ctx.with_rebuild_hash(sha);
    }
    ArtifactValidator::new(ctx).validate(artifact, tier, &config.validation.checks)
}

fn check_hard_failures(results: &[ValidationResult]) -> Result<()> {
    let failed: Vec<&ValidationResult> = results.iter().filter(|r| r.is_hard_failure()).collect();
    if failed.is_empty() {
        for warning in results.iter().filter(|r| !r.passed) {
            warn!(check = %warning.check_type, message = %warning.message, "soft check failed");
        }
        return Ok(());
    }

    let violations = failed
        .iter()
        .filter(|r| r.check_type == CheckType::Imports)
        .flat_map(|r| {
            serde_json::from_value::<Vec<ImportViolation>>(r.details.clone()).unwrap_or_default()
        })
        .collect();
    let failed_checks: Vec<String> = failed.iter().map(|r| r.check_type.to_string()).collect();
    Err(TiergateError::Validation {
        summary: format!(
            "{} hard check failure(s): {}",
            failed.len(),
            failed
                .iter()
                .map(|r| format!("{} ({})", r.check_type, r.message))
                .collect::<Vec<_>>()
                .join("; ")
        ),
        violations,
        failed_checks,
    })
}

/// First successful build of a committed revision records its hash; the size baseline
/// is recorded once and replaced only on request.
fn record_state(state_dir: &Path, artifact: &BuildArtifact, update_baseline: bool) -> Result<()> {
    if git::is_recorded_revision(&artifact.source_revision) {
        let mut ledger = DeterminismLedger::load(state_dir)?;
        if ledger
            .get(&artifact.source_revision, artifact.tier, &artifact.platform)
            .is_none()
        {
            ledger.record(
                &artifact.source_revision,
                artifact.tier,
                &artifact.platform,
                &artifact.sha256,
            );
            ledger.save(state_dir)?;
        }
    }

    let mut baseline = SizeBaseline::load(state_dir)?;
    if update_baseline || baseline.get(artifact.tier, &artifact.platform).is_none() {
        baseline.record(artifact.tier, &artifact.platform, artifact.size_bytes);
        baseline.save(state_dir)?;
        debug!(size_bytes = artifact.size_bytes, "size baseline recorded");
    }
    Ok(())
}
