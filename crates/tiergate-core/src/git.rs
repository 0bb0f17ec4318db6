//! Git helpers for the source revision and reproducible timestamps.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Revision recorded when the project is not a git checkout.
pub const UNKNOWN_REVISION: &str = "unknown";

/// Appended to the HEAD SHA when the working tree has uncommitted changes.
pub const DIRTY_SUFFIX: &str = "-dirty";

/// Whether builds of `revision` identify their inputs well enough to be
/// recorded in, and compared against, the determinism ledger.
pub fn is_recorded_revision(revision: &str) -> bool {
    revision != UNKNOWN_REVISION && !revision.ends_with(DIRTY_SUFFIX)
}

/// Capture the HEAD commit SHA of the repository containing `repo_dir`.
///
/// Returns `None` if the directory is not inside a git repository or git is
/// not installed.
pub fn capture_head_sha(repo_dir: &Path) -> Option<String> {
    let sha = run_git(repo_dir, &["rev-parse", "HEAD"])?;
    (!sha.is_empty()).then_some(sha)
}

/// HEAD SHA of `repo_dir`, suffixed with [`DIRTY_SUFFIX`] when anything under
/// `repo_dir` other than the `ignored` paths is modified or untracked.
pub fn source_revision(repo_dir: &Path, ignored: &[PathBuf]) -> Option<String> {
    let sha = capture_head_sha(repo_dir)?;
    if is_dirty(repo_dir, ignored).unwrap_or(false) {
        Some(format!("{sha}{DIRTY_SUFFIX}"))
    } else {
        Some(sha)
    }
}

/// `git status --porcelain` limited to `repo_dir`, minus `ignored`.
pub fn is_dirty(repo_dir: &Path, ignored: &[PathBuf]) -> Option<bool> {
    let mut args = vec![
        "status".to_string(),
        "--porcelain".to_string(),
        "--".to_string(),
        ".".to_string(),
    ];
    let root = repo_dir
        .canonicalize()
        .unwrap_or_else(|_| repo_dir.to_path_buf());
    for path in ignored {
        let full = if path.is_absolute() {
            path.clone()
        } else {
            repo_dir.join(path)
        };
        // Paths that do not exist yet cannot show up in the status either.
        let Ok(full) = full.canonicalize() else {
            continue;
        };
        let Ok(rel) = full.strip_prefix(&root) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        args.push(format!(":(exclude){}", rel.to_string_lossy().replace('\\', "/")));
    }
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    Some(!run_git(repo_dir, &args)?.is_empty())
}

/// Committer timestamp of HEAD in seconds since the epoch. Used as the
/// default `SOURCE_DATE_EPOCH`.
pub fn commit_timestamp(repo_dir: &Path) -> Option<i64> {
    run_git(repo_dir, &["log", "-1", "--format=%ct", "HEAD"])?
        .parse()
        .ok()
}

fn run_git(repo_dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
