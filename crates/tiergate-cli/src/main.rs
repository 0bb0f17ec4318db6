//! Tiergate - dual-tier build orchestration CLI
//!
//! The `tiergate` command builds one tier of a project and validates what it
//! produced.
//!
//! ## Commands
//!
//! - `build`: Select a tier, resolve dependencies, compile and validate
//! - `community` / `enterprise`: `build` with the tier fixed
//! - `validate-artifact`: Run artifact checks against an existing output
//! - `matrix`: Plan, run and gate a (tier x platform) CI matrix

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{error::ErrorKind, Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, warn, Level};

use tiergate_ci::{render_workflow, GateVerdict, JobResult, JobRunner, MatrixSpec, ReleaseGate};
use tiergate_core::driver::ARTIFACT_TYPE;
use tiergate_core::git::commit_timestamp;
use tiergate_core::obs::BuildSpan;
use tiergate_core::validate::{exit_code as validation_exit_code, EXIT_USAGE};
use tiergate_core::{
    host_platform, select_tier, ArtifactValidator, BuildArtifact, BuildDriver,
    BuildFailure, BuildReport, BuildRequest, CheckType, FailureCategory, ManifestLoader, Project,
    TierName, ValidationContext, ValidationResult, BOM_FILE, CONFIG_ENV_VAR, TIER_ENV_VAR,
    UNKNOWN_REVISION,
};

#[derive(Parser)]
#[command(name = "tiergate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Dual-tier build orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Project root
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Configuration file (default: <project>/tiergate.toml)
    #[arg(long, global = true, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build one tier of the project
    Build {
        /// community or enterprise (falls back to $TIER, then community)
        #[arg(long)]
        tier: Option<String>,

        #[command(flatten)]
        options: BuildOptions,
    },

    /// Same as `build --tier community`
    Community {
        #[command(flatten)]
        options: BuildOptions,
    },

    /// Same as `build --tier enterprise`
    Enterprise {
        #[command(flatten)]
        options: BuildOptions,
    },

    /// Run validation checks against an existing artifact
    ValidateArtifact {
        /// Artifact file or directory
        #[arg(long)]
        artifact: PathBuf,

        /// Tier the artifact was built for (falls back to $TIER)
        #[arg(long)]
        tier: Option<String>,

        /// Comma-separated checks (imports,licenses,size,determinism,bom) or "all"
        #[arg(long, default_value = "all")]
        checks: String,

        /// Bill of materials (default: bom.json next to the artifact)
        #[arg(long)]
        bom: Option<PathBuf>,

        /// Tier manifest used for license data
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Platform the artifact was built for
        #[arg(long)]
        platform: Option<String>,

        /// Source revision (default: git HEAD of the project)
        #[arg(long)]
        revision: Option<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// CI matrix operations
    Matrix {
        #[command(subcommand)]
        action: MatrixAction,
    },
}

#[derive(Args)]
struct BuildOptions {
    /// auto, registry, vendored or cdn
    #[arg(long, default_value = "auto")]
    source: String,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Debug logging and captured tool output in the report
    #[arg(long)]
    debug: bool,

    /// Target platform (default: host <os>-<arch>)
    #[arg(long)]
    platform: Option<String>,

    /// Source revision (default: git HEAD of the project)
    #[arg(long)]
    revision: Option<String>,

    /// Output directory (default: [project].output_dir)
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Overwrite the recorded size baseline
    #[arg(long)]
    update_baseline: bool,
}

#[derive(Args)]
struct MatrixOptions {
    /// Comma-separated platforms (default: host)
    #[arg(long, value_delimiter = ',')]
    platforms: Vec<String>,

    /// Comma-separated tiers (default: community,enterprise)
    #[arg(long, value_delimiter = ',')]
    tiers: Vec<String>,

    /// External (forked) contribution: community jobs only, no secrets
    #[arg(long)]
    external: bool,
}

#[derive(Subcommand)]
enum MatrixAction {
    /// Print the scheduled jobs as JSON
    Plan {
        #[command(flatten)]
        matrix: MatrixOptions,
    },

    /// Run every job as its own `tiergate build` process and gate the results
    Run {
        #[command(flatten)]
        matrix: MatrixOptions,

        /// Root of the per-job output directories (default: <output_dir>/matrix)
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Jobs in flight at once (0 = all)
        #[arg(long, default_value = "0")]
        parallel: usize,

        /// Per-job timeout in seconds (0 disables)
        #[arg(long, default_value = "3600")]
        timeout_secs: u64,

        /// Source revision passed to every job (default: git HEAD of the project)
        #[arg(long)]
        revision: Option<String>,

        /// Write per-job results to this file
        #[arg(long)]
        results: Option<PathBuf>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate the release gate over saved job results
    Gate {
        /// Results file written by `matrix run --results`
        results: PathBuf,

        /// Do not require both tiers (external contributions)
        #[arg(long)]
        external: bool,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render a CI workflow template
    Workflow {
        #[command(flatten)]
        matrix: MatrixOptions,

        /// Workflow name
        #[arg(long, default_value = "tiered-build")]
        name: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Commands {
    fn debug(&self) -> bool {
        match self {
            Commands::Build { options, .. }
            | Commands::Community { options }
            | Commands::Enterprise { options } => options.debug,
            _ => false,
        }
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<OsString> = std::env::args_os().collect();
    let cli = match Cli::try_parse_from(&args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => usage_exit_code(&args),
            };
            std::process::exit(code);
        }
    };

    // Setup logging
    let level = if cli.verbose || cli.command.debug() {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tiergate_core::telemetry::init_tracing(cli.log_json, level);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            FailureCategory::Configuration.exit_code()
        }
    };
    std::process::exit(code);
}

/// Invalid arguments are a usage error for `validate-artifact` and a
/// configuration error everywhere else.
fn usage_exit_code(args: &[OsString]) -> i32 {
    if args.iter().skip(1).any(|a| a == "validate-artifact") {
        EXIT_USAGE
    } else {
        FailureCategory::Configuration.exit_code()
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let project_root = cli.project.clone();
    let config = cli.config.clone();
    let project = || Project::open(&project_root, config.as_deref());

    match cli.command {
        Commands::Build { tier, options } => Ok(cmd_build(project, tier, options).await),
        Commands::Community { options } => {
            Ok(cmd_build(project, Some(TierName::Community.to_string()), options).await)
        }
        Commands::Enterprise { options } => {
            Ok(cmd_build(project, Some(TierName::Enterprise.to_string()), options).await)
        }
        Commands::ValidateArtifact {
            artifact,
            tier,
            checks,
            bom,
            manifest,
            platform,
            revision,
            json,
        } => Ok(cmd_validate_artifact(
            project,
            ValidateArgs {
                artifact,
                tier,
                checks,
                bom,
                manifest,
                platform,
                revision,
                json,
            },
        )),
        Commands::Matrix { action } => match action {
            MatrixAction::Plan { matrix } => cmd_matrix_plan(&project()?, &matrix),
            MatrixAction::Run {
                matrix,
                out_dir,
                parallel,
                timeout_secs,
                revision,
                results,
                json,
            } => {
                let project = project()?;
                let out_root = out_dir.unwrap_or_else(|| project.output_dir().join("matrix"));
                let program = std::env::current_exe().context("cannot locate the tiergate binary")?;
                let runner = JobRunner::new(program, &project.root, &out_root)
                    .with_config(config.clone())
                    .with_revision(revision.or_else(|| project.source_revision()))
                    .with_source_date_epoch(
                        source_date_epoch().or_else(|| commit_timestamp(&project.root)),
                    )
                    .with_excluded(vec![project.output_dir()])
                    .with_timeout(timeout_secs)
                    .with_max_parallel(parallel);
                cmd_matrix_run(&project, &matrix, &runner, results.as_deref(), json).await
            }
            MatrixAction::Gate {
                results,
                external,
                json,
            } => cmd_matrix_gate(&results, external, json),
            MatrixAction::Workflow {
                matrix,
                name,
                output,
            } => cmd_matrix_workflow(&project()?, &matrix, &name, output.as_deref()),
        },
    }
}

// ---------------------------------------------------------------------------
// build
// ---------------------------------------------------------------------------

async fn cmd_build(
    project: impl FnOnce() -> tiergate_core::Result<Project>,
    tier: Option<String>,
    options: BuildOptions,
) -> i32 {
    let request = BuildRequest {
        tier_flag: tier,
        env_tier: std::env::var(TIER_ENV_VAR).ok(),
        source: Some(options.source),
        debug: options.debug,
        platform: options.platform,
        revision: options.revision,
        output_dir: options.out_dir,
        update_baseline: options.update_baseline,
        source_date_epoch: source_date_epoch(),
    };

    let project = match project() {
        Ok(project) => project,
        Err(e) => {
            let failure = BuildFailure::before_start(e, &request);
            print_report(&failure.report, options.json);
            return failure.exit_code();
        }
    };

    match BuildDriver::new(&project).build(&request).await {
        Ok(outcome) => {
            print_report(&outcome.report, options.json);
            0
        }
        Err(failure) => {
            print_report(&failure.report, options.json);
            failure.exit_code()
        }
    }
}

fn source_date_epoch() -> Option<i64> {
    let value = std::env::var("SOURCE_DATE_EPOCH").ok()?;
    match value.trim().parse() {
        Ok(epoch) => Some(epoch),
        Err(_) => {
            warn!(value = %value, "ignoring unparseable SOURCE_DATE_EPOCH");
            None
        }
    }
}

fn print_report(report: &BuildReport, json: bool) {
    if json {
        match report.to_json() {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("error: cannot serialize report: {e}"),
        }
    } else {
        print!("{}", report.render_human());
    }
}

// ---------------------------------------------------------------------------
// validate-artifact
// ---------------------------------------------------------------------------

struct ValidateArgs {
    artifact: PathBuf,
    tier: Option<String>,
    checks: String,
    bom: Option<PathBuf>,
    manifest: Option<PathBuf>,
    platform: Option<String>,
    revision: Option<String>,
    json: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidationOutput<'a> {
    artifact: &'a BuildArtifact,
    passed: bool,
    results: &'a [ValidationResult],
}

fn cmd_validate_artifact(
    project: impl FnOnce() -> tiergate_core::Result<Project>,
    args: ValidateArgs,
) -> i32 {
    match validate_artifact(project, &args) {
        Ok((artifact, results)) => {
            let code = validation_exit_code(&results);
            if args.json {
                let output = ValidationOutput {
                    artifact: &artifact,
                    passed: code == 0,
                    results: &results,
                };
                match serde_json::to_string_pretty(&output) {
                    Ok(text) => println!("{text}"),
                    Err(e) => eprintln!("error: cannot serialize results: {e}"),
                }
            } else {
                println!(
                    "{} ({}, {} bytes, sha256 {})",
                    artifact.path.display(),
                    artifact.tier,
                    artifact.size_bytes,
                    artifact.short_sha()
                );
                for result in &results {
                    let mark = if result.passed {
                        "pass"
                    } else if result.is_hard_failure() {
                        "FAIL"
                    } else {
                        "warn"
                    };
                    println!("  [{mark}] {}: {}", result.check_type, result.message);
                }
            }
            code
        }
        Err(e) => {
            eprintln!("error: {e}");
            EXIT_USAGE
        }
    }
}

fn validate_artifact(
    project: impl FnOnce() -> tiergate_core::Result<Project>,
    args: &ValidateArgs,
) -> tiergate_core::Result<(BuildArtifact, Vec<ValidationResult>)> {
    let project = project()?;
    let env_tier = std::env::var(TIER_ENV_VAR).ok();
    let tier = select_tier(args.tier.as_deref(), env_tier.as_deref())?;
    let checks = CheckType::parse_list(&args.checks)?;

    if !args.artifact.exists() {
        return Err(tiergate_core::TiergateError::config(format!(
            "artifact {} not found",
            args.artifact.display()
        )));
    }

    let (artifact_path, default_bom) = locate_artifact(&project, &args.artifact);
    let bom = args.bom.clone().unwrap_or(default_bom);
    let platform = args.platform.clone().unwrap_or_else(host_platform);
    let revision = args
        .revision
        .clone()
        .or_else(|| project.source_revision())
        .unwrap_or_else(|| UNKNOWN_REVISION.to_string());

    let artifact = BuildArtifact::from_file(
        ARTIFACT_TYPE,
        tier.name(),
        &platform,
        &artifact_path,
        &revision,
        Some(bom),
    )?;
    let _span = BuildSpan::enter(
        &format!("validate-{}", artifact.short_sha()),
        tier.name().as_str(),
        &platform,
    );

    let manifest = match &args.manifest {
        Some(path) => {
            let loader = ManifestLoader::new(&project.config.licenses)?;
            Some(loader.load(tier, &project.resolve(path))?)
        }
        None => None,
    };

    let state_dir = project.state_dir();
    let mut ctx = ValidationContext::new(&project.boundaries, &project.config.licenses)
        .with_config(&project.config.validation)
        .with_state_dir(&state_dir);
    if let Some(manifest) = &manifest {
        ctx = ctx.with_manifest(manifest);
    }

    let results = ArtifactValidator::new(ctx).validate(&artifact, tier, &checks);
    Ok((artifact, results))
}

/// The artifact to validate and its default bill of materials.
///
/// A promoted output directory stands for the artifact file inside it, so it
/// validates exactly like the file the build recorded. Other directories are
/// validated as a whole with `bom.json` inside; files look for a sibling.
fn locate_artifact(project: &Project, path: &Path) -> (PathBuf, PathBuf) {
    if !path.is_dir() {
        return (path.to_path_buf(), sibling(path, BOM_FILE));
    }
    let bom = path.join(BOM_FILE);
    let bundle = path.join(&project.config.project.artifact_name);
    if bundle.is_file() {
        debug!(artifact = %bundle.display(), "validating the artifact inside the output directory");
        (bundle, bom)
    } else {
        (path.to_path_buf(), bom)
    }
}

fn sibling(path: &Path, name: &str) -> PathBuf {
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

// ---------------------------------------------------------------------------
// matrix
// ---------------------------------------------------------------------------

fn matrix_spec(options: &MatrixOptions) -> Result<MatrixSpec> {
    let platforms = if options.platforms.is_empty() {
        vec![host_platform()]
    } else {
        options.platforms.clone()
    };
    let mut spec = MatrixSpec::new(platforms).external(options.external);
    if !options.tiers.is_empty() {
        let tiers = options
            .tiers
            .iter()
            .map(|t| TierName::from_str(t))
            .collect::<tiergate_core::Result<Vec<_>>>()?;
        spec = spec.with_tiers(tiers);
    }
    Ok(spec)
}

fn gate_for(external: bool) -> ReleaseGate {
    if external {
        ReleaseGate::checks_only()
    } else {
        ReleaseGate::release()
    }
}

fn cmd_matrix_plan(project: &Project, options: &MatrixOptions) -> Result<i32> {
    let jobs = matrix_spec(options)?.plan(&project.config);
    println!("{}", serde_json::to_string_pretty(&jobs)?);
    Ok(0)
}

#[derive(Serialize)]
struct MatrixOutput<'a> {
    jobs: &'a [JobResult],
    verdict: &'a GateVerdict,
}

async fn cmd_matrix_run(
    project: &Project,
    options: &MatrixOptions,
    runner: &JobRunner,
    results_path: Option<&Path>,
    json: bool,
) -> Result<i32> {
    let jobs = matrix_spec(options)?.plan(&project.config);
    let results = runner.run_all(&jobs).await;

    if let Some(path) = results_path {
        tiergate_core::fsutil::write_json(path, &results)
            .with_context(|| format!("cannot write {}", path.display()))?;
    }

    let verdict = gate_for(options.external).evaluate(&results);
    if json {
        let output = MatrixOutput {
            jobs: &results,
            verdict: &verdict,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for result in &results {
            let status = if result.passed() { "✓" } else { "✗" };
            println!("  {} {} ({}ms)", status, result.attribution(), result.duration_ms);
        }
        println!();
        print_verdict(&verdict);
    }
    Ok(if verdict.passed { 0 } else { 1 })
}

fn cmd_matrix_gate(results_path: &Path, external: bool, json: bool) -> Result<i32> {
    let content = std::fs::read_to_string(results_path)
        .with_context(|| format!("cannot read {}", results_path.display()))?;
    let results: Vec<JobResult> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a matrix results file", results_path.display()))?;

    let verdict = gate_for(external).evaluate(&results);
    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        print_verdict(&verdict);
    }
    Ok(if verdict.passed { 0 } else { 1 })
}

fn print_verdict(verdict: &GateVerdict) {
    println!(
        "Gate: {} ({})",
        if verdict.passed { "✓ PASSED" } else { "✗ FAILED" },
        verdict.message
    );
    if !verdict.violations.is_empty() {
        println!("Violations:");
        for violation in &verdict.violations {
            println!("  - {}", violation);
        }
    }
}

fn cmd_matrix_workflow(
    project: &Project,
    options: &MatrixOptions,
    name: &str,
    output: Option<&Path>,
) -> Result<i32> {
    let yaml = render_workflow(name, &matrix_spec(options)?, &project.config);
    match output {
        Some(path) => {
            tiergate_core::fsutil::write_atomic(path, yaml.as_bytes())
                .with_context(|| format!("cannot write {}", path.display()))?;
            println!("Wrote workflow to {}", path.display());
        }
        None => print!("{yaml}"),
    }
    Ok(0)
}
