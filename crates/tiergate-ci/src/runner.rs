//! Per-job execution: one `tiergate build --json` process per matrix leg.
//!
//! Each leg builds from its own copy of the checkout under
//! `<out_root>/.work/<job id>/` and writes its output to
//! `<out_root>/<job id>/`. Legs share no files they write.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tiergate_core::{obs, BuildReport, FailureCategory, TIER_ENV_VAR};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::matrix::{known_secrets, CiMatrixJob};
use crate::worktree;

/// Directory under the output root holding the per-job working copies.
pub const WORK_DIR: &str = ".work";

/// Outcome of one matrix job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub job: CiMatrixJob,

    /// Process exit code; `-1` when the job never produced one.
    pub exit_code: i32,

    pub category: Option<FailureCategory>,

    /// Parsed `--json` report, when stdout held one.
    pub report: Option<BuildReport>,

    /// Runner-side failure (spawn error, timeout).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,
}

impl JobResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// Combine an exit code with the job's report into a result.
    ///
    /// The report's own failure category wins over the exit-code mapping.
    pub fn from_exit(
        job: CiMatrixJob,
        exit_code: i32,
        report: Option<BuildReport>,
        duration_ms: u64,
    ) -> Self {
        let category = if exit_code == 0 {
            None
        } else {
            report
                .as_ref()
                .and_then(|r| r.failure_category)
                .or_else(|| FailureCategory::from_exit_code(exit_code))
        };
        Self {
            job,
            exit_code,
            category,
            report,
            error: None,
            duration_ms,
        }
    }

    /// One-line attribution: job, category and the step that failed.
    pub fn attribution(&self) -> String {
        if self.passed() {
            return format!("{}: passed", self.job.id());
        }
        let category = self
            .category
            .map(|c| c.as_str())
            .unwrap_or("unattributed");
        let mut line = format!("{}: {category} (exit {})", self.job.id(), self.exit_code);
        if let Some(step) = self.report.as_ref().and_then(|r| r.failed_step.as_deref()) {
            line.push_str(&format!(" at step {step}"));
        }
        if let Some(error) = self
            .error
            .as_deref()
            .or_else(|| self.report.as_ref().and_then(|r| r.error.as_deref()))
        {
            if let Some(first) = error.lines().next() {
                line.push_str(&format!(": {first}"));
            }
        }
        line
    }
}

/// Runs matrix jobs as independent build processes.
#[derive(Debug, Clone)]
pub struct JobRunner {
    program: PathBuf,
    project_root: PathBuf,
    config: Option<PathBuf>,
    out_root: PathBuf,
    revision: Option<String>,
    source_date_epoch: Option<i64>,
    excluded: Vec<PathBuf>,
    timeout_secs: u64,
    max_parallel: usize,
}

impl JobRunner {
    /// `program` is the `tiergate` binary; each job writes below `out_root/<job id>`.
    pub fn new(program: impl Into<PathBuf>, project_root: &Path, out_root: &Path) -> Self {
        Self {
            program: program.into(),
            project_root: project_root.to_path_buf(),
            config: None,
            out_root: out_root.to_path_buf(),
            revision: None,
            source_date_epoch: None,
            excluded: Vec::new(),
            timeout_secs: 3600,
            max_parallel: 0,
        }
    }

    pub fn with_config(mut self, config: Option<PathBuf>) -> Self {
        self.config = config;
        self
    }

    /// Revision every job reports. Working copies carry no git metadata, so
    /// without one the jobs build as `unknown`.
    pub fn with_revision(mut self, revision: Option<String>) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_source_date_epoch(mut self, epoch: Option<i64>) -> Self {
        self.source_date_epoch = epoch;
        self
    }

    /// Checkout paths left out of the working copies, such as build output.
    pub fn with_excluded(mut self, excluded: Vec<PathBuf>) -> Self {
        self.excluded = excluded;
        self
    }

    /// `0` disables the per-job timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Jobs in flight at once; `0` runs every job at the same time.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Where the job's promoted output lands; the build names it `<tier>-<platform>`.
    pub fn job_out_dir(&self, job: &CiMatrixJob) -> PathBuf {
        self.out_root.join(job.id())
    }

    pub fn job_worktree(&self, job: &CiMatrixJob) -> PathBuf {
        self.out_root.join(WORK_DIR).join(job.id())
    }

    /// Run every job and return results in job order.
    ///
    /// Jobs share nothing: each gets its own working copy, output directory
    /// and only the secrets in its scope.
    pub async fn run_all(&self, jobs: &[CiMatrixJob]) -> Vec<JobResult> {
        let limit = match self.max_parallel {
            0 => jobs.len().max(1),
            n => n,
        };
        let withheld = known_secrets(jobs);
        let withheld = &withheld;
        let mut results: Vec<(usize, JobResult)> = futures::stream::iter(jobs.iter().enumerate())
            .map(|(index, job)| async move { (index, self.run_job(job, withheld).await) })
            .buffer_unordered(limit)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Run one job. `withheld` lists secrets removed unless the job is scoped to them.
    pub async fn run_job(&self, job: &CiMatrixJob, withheld: &BTreeSet<String>) -> JobResult {
        let start = Instant::now();
        let (worktree, out_root) = match self.prepare(job).await {
            Ok(paths) => paths,
            Err(error) => {
                return self.finish(JobResult {
                    job: job.clone(),
                    exit_code: -1,
                    category: None,
                    report: None,
                    error: Some(error),
                    duration_ms: start.elapsed().as_millis() as u64,
                })
            }
        };
        let out_dir = out_root.join(job.id());

        let mut cmd = Command::new(&self.program);
        cmd.arg("build")
            .arg("--json")
            .arg("--tier")
            .arg(job.tier.as_str())
            .arg("--platform")
            .arg(&job.platform)
            .arg("--out-dir")
            .arg(&out_root)
            .arg("--project")
            .arg(&worktree);
        if let Some(config) = &self.config {
            cmd.arg("--config").arg(absolute(&self.project_root.join(config)));
        }
        if let Some(revision) = &self.revision {
            cmd.arg("--revision").arg(revision);
        }
        cmd.env(TIER_ENV_VAR, job.tier.as_str());
        if let Some(epoch) = self.source_date_epoch {
            cmd.env("SOURCE_DATE_EPOCH", epoch.to_string());
        }
        for secret in withheld {
            if !job.secrets_scope.contains(secret) {
                cmd.env_remove(secret);
            }
        }
        cmd.current_dir(&worktree)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(job = %job.id(), out_dir = %out_dir.display(), "starting matrix job");
        let result = match self.wait(cmd).await {
            Ok((exit_code, stdout, stderr)) => {
                let report = match serde_json::from_str::<BuildReport>(stdout.trim()) {
                    Ok(report) => Some(report),
                    Err(e) => {
                        warn!(job = %job.id(), error = %e, "job printed no parseable report");
                        None
                    }
                };
                let mut result = JobResult::from_exit(
                    job.clone(),
                    exit_code,
                    report,
                    start.elapsed().as_millis() as u64,
                );
                if result.report.is_none() && !result.passed() {
                    let tail = stderr.lines().last().unwrap_or("").trim();
                    if !tail.is_empty() {
                        result.error = Some(tail.to_string());
                    }
                }
                result
            }
            Err(error) => JobResult {
                job: job.clone(),
                exit_code: -1,
                category: None,
                report: None,
                error: Some(error),
                duration_ms: start.elapsed().as_millis() as u64,
            },
        };

        self.finish(result)
    }

    fn finish(&self, result: JobResult) -> JobResult {
        obs::emit_matrix_job_finished(
            result.job.tier.as_str(),
            &result.job.platform,
            result.exit_code,
            result.category,
            result.duration_ms,
        );
        result
    }

    /// Refresh the job's working copy; returns it with the absolute output root.
    async fn prepare(&self, job: &CiMatrixJob) -> Result<(PathBuf, PathBuf), String> {
        let source = self.project_root.clone();
        let out_root = self.out_root.clone();
        let worktree = self.job_worktree(job);
        let mut excluded = self.excluded.clone();
        excluded.push(out_root.clone());

        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&out_root)?;
            worktree::copy_checkout(&source, &worktree, &excluded)?;
            Ok::<_, std::io::Error>((absolute(&worktree), absolute(&out_root)))
        })
        .await
        .map_err(|e| format!("working copy task failed: {e}"))?
        .map_err(|e| format!("cannot prepare working copy: {e}"))
    }

    async fn wait(&self, mut cmd: Command) -> Result<(i32, String, String), String> {
        let child = cmd
            .spawn()
            .map_err(|e| format!("cannot start {}: {e}", self.program.display()))?;

        let output = if self.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(self.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| format!("timed out after {} seconds", self.timeout_secs))?
        } else {
            child.wait_with_output().await
        }
        .map_err(|e| e.to_string())?;

        Ok((
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ))
    }
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
