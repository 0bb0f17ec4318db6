//! Integration tests for matrix planning, per-job runs and the release gate.
//!
//! Jobs run against a stand-in `tiergate` script that records what each
//! process saw, writes an install manifest into its working directory the way
//! a real build does, and prints a canned `--json` report.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tiergate_ci::{JobResult, JobRunner, MatrixSpec, ReleaseGate};
use tiergate_core::{EngineConfig, FailureCategory, TierName};

const CONFIG: &str = r#"
[tiers.enterprise]
manifest = "manifests/enterprise.toml"
sources = [
  { type = "registry", priority = 1, locator = "https://npm.corp.example", requires_auth = true, auth_env = "TIERGATE_MATRIX_TEST_TOKEN" },
  { type = "vendored", priority = 2, locator = "vendor/enterprise" },
]
"#;

const FAKE_TIERGATE: &str = r#"#!/bin/sh
tier=""; platform=""; out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --tier) tier="$2"; shift ;;
    --platform) platform="$2"; shift ;;
    --out-dir) out="$2"; shift ;;
  esac
  shift
done
dir="$out/$tier-$platform"
mkdir -p "$dir"
pwd > "$dir/cwd"
printf '%s' "$TIER" > "$dir/tier-env"
printf '%s' "${TIERGATE_MATRIX_TEST_TOKEN:-}" > "$dir/secret"
printf '%s' "$tier" > package.json
sleep 1
cp package.json "$dir/installed"
meta="\"metadata\":{\"durationSeconds\":0.1,\"platform\":\"$platform\",\"sourceRevision\":\"abc123\",\"buildId\":\"b-$tier-$platform\"}"
if [ "$platform" = "broken" ] && [ "$tier" = "community" ]; then
  echo "{\"status\":\"failure\",\"tier\":\"$tier\",\"source\":\"vendored\",\"artifact\":null,$meta,\"failureCategory\":\"validation\",\"failedStep\":\"compiled\",\"error\":\"validation failed: 1 prohibited import\"}"
  exit 2
fi
if [ "$platform" = "crash" ]; then
  echo "compiler crashed" >&2
  exit 139
fi
echo "{\"status\":\"success\",\"tier\":\"$tier\",\"source\":\"vendored\",\"artifact\":{\"path\":\"$dir/bundle.js\",\"sha256\":\"00\",\"sizeBytes\":1},$meta}"
"#;

fn config() -> EngineConfig {
    EngineConfig::from_toml_str(CONFIG).expect("config")
}

fn fake_tiergate(dir: &Path) -> PathBuf {
    let path = dir.join("tiergate");
    std::fs::write(&path, FAKE_TIERGATE).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn runner(dir: &Path) -> JobRunner {
    JobRunner::new(fake_tiergate(dir), dir, &dir.join("out"))
        .with_timeout(30)
        .with_max_parallel(4)
}

fn read(dir: &Path, job: &str, file: &str) -> String {
    std::fs::read_to_string(dir.join("out").join(job).join(file)).unwrap()
}

#[tokio::test]
async fn test_matrix_jobs_are_isolated_and_scoped() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("TIERGATE_MATRIX_TEST_TOKEN", "s3cret");

    let jobs = MatrixSpec::new(["linux-x86_64", "macos-aarch64"]).plan(&config());
    assert_eq!(jobs.len(), 4);

    let results = runner(dir.path()).run_all(&jobs).await;
    let ids: Vec<String> = results.iter().map(|r| r.job.id()).collect();
    assert_eq!(
        ids,
        vec![
            "community-linux-x86_64",
            "community-macos-aarch64",
            "enterprise-linux-x86_64",
            "enterprise-macos-aarch64",
        ]
    );
    for result in &results {
        assert!(result.passed(), "{}", result.attribution());
        let report = result.report.as_ref().expect("report parsed");
        assert_eq!(report.tier, Some(result.job.tier));
    }

    assert_eq!(read(dir.path(), "community-linux-x86_64", "tier-env"), "community");
    assert_eq!(read(dir.path(), "enterprise-macos-aarch64", "tier-env"), "enterprise");
    assert_eq!(read(dir.path(), "community-linux-x86_64", "secret"), "");
    assert_eq!(read(dir.path(), "community-macos-aarch64", "secret"), "");
    assert_eq!(read(dir.path(), "enterprise-linux-x86_64", "secret"), "s3cret");

    let verdict = ReleaseGate::release().evaluate(&results);
    assert!(verdict.passed, "{:?}", verdict.violations);
}

#[tokio::test]
async fn test_concurrent_legs_build_from_private_working_copies() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src/core")).unwrap();
    std::fs::write(dir.path().join("src/core/App.ext"), "export const App = 1;\n").unwrap();

    let jobs = MatrixSpec::new(["linux-x86_64", "macos-aarch64"]).plan(&config());
    let results = runner(dir.path()).run_all(&jobs).await;
    assert!(results.iter().all(|r| r.passed()));

    for job in &jobs {
        let id = job.id();
        assert_eq!(read(dir.path(), &id, "installed"), job.tier.as_str());

        let worktree = dir.path().join("out/.work").join(&id);
        let cwd = read(dir.path(), &id, "cwd");
        assert!(Path::new(cwd.trim()).ends_with(Path::new(".work").join(&id)), "{cwd}");
        assert!(worktree.join("src/core/App.ext").is_file());
        assert!(!worktree.join("out").exists());
    }
    assert!(!dir.path().join("package.json").exists());
}

#[tokio::test]
async fn test_failing_leg_does_not_cancel_others() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = MatrixSpec::new(["linux-x86_64", "broken", "crash"]).plan(&config());

    let results = runner(dir.path()).run_all(&jobs).await;
    assert_eq!(results.len(), 6);

    let by_id = |id: &str| -> &JobResult {
        results.iter().find(|r| r.job.id() == id).expect("job ran")
    };

    let broken = by_id("community-broken");
    assert_eq!(broken.exit_code, 2);
    assert_eq!(broken.category, Some(FailureCategory::Validation));
    assert_eq!(
        broken.attribution(),
        "community-broken: validation_error (exit 2) at step compiled: validation failed: 1 prohibited import"
    );

    let crashed = by_id("enterprise-crash");
    assert_eq!(crashed.exit_code, 139);
    assert_eq!(crashed.category, None);
    assert!(crashed.report.is_none());
    assert_eq!(crashed.error.as_deref(), Some("compiler crashed"));

    assert!(by_id("community-linux-x86_64").passed());
    assert!(by_id("enterprise-broken").passed());
    assert!(by_id("enterprise-linux-x86_64").passed());

    let verdict = ReleaseGate::release().evaluate(&results);
    assert!(!verdict.passed);
    assert_eq!(verdict.violations.len(), 3);
    assert!(verdict.message.starts_with("3 of 6 matrix jobs failed"));
}

#[tokio::test]
async fn test_external_contribution_runs_community_without_secrets() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("TIERGATE_MATRIX_TEST_TOKEN", "s3cret");

    let jobs = MatrixSpec::new(["linux-x86_64"])
        .external(true)
        .plan(&config());
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].tier, TierName::Community);

    let results = runner(dir.path()).run_all(&jobs).await;
    assert!(results[0].passed());
    assert_eq!(read(dir.path(), "community-linux-x86_64", "secret"), "");

    assert!(ReleaseGate::checks_only().evaluate(&results).passed);
    assert!(!ReleaseGate::release().evaluate(&results).passed);
}

#[tokio::test]
async fn test_gate_reads_saved_results() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = MatrixSpec::new(["broken"]).plan(&config());
    let results = runner(dir.path()).run_all(&jobs).await;

    let saved = serde_json::to_string(&results).unwrap();
    let loaded: Vec<JobResult> = serde_json::from_str(&saved).unwrap();

    let verdict = ReleaseGate::release().evaluate(&loaded);
    assert!(!verdict.passed);
    assert_eq!(verdict.violations.len(), 1);
    assert!(verdict.violations[0].starts_with("community-broken: validation_error"));
}
