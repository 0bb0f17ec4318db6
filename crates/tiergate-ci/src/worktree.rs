//! Per-job working copies of the project checkout.
//!
//! A build writes into its project root: the materialized install manifest,
//! whatever the installer fetches, and the determinism and size state. Legs
//! that run at the same time therefore each build from a private copy.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Entry names never copied, wherever they appear.
const SKIPPED_NAMES: &[&str] = &[".git"];

/// Recreate `dest` as a copy of `source`.
///
/// `.git`, every path in `excluded` and `dest` itself are left out. Symlinks
/// are copied as links. Returns the number of files copied.
pub fn copy_checkout(source: &Path, dest: &Path, excluded: &[PathBuf]) -> io::Result<usize> {
    let source = source.canonicalize()?;
    if dest.exists() {
        std::fs::remove_dir_all(dest)?;
    }
    std::fs::create_dir_all(dest)?;

    let mut pruned: Vec<PathBuf> = excluded
        .iter()
        .filter_map(|path| path.canonicalize().ok())
        .collect();
    pruned.push(dest.canonicalize()?);

    let mut files = 0;
    let walker = WalkDir::new(&source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_pruned(entry, &pruned));
    for entry in walker {
        let entry = entry?;
        let Ok(rel) = entry.path().strip_prefix(&source) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
            files += 1;
        }
    }

    debug!(source = %source.display(), dest = %dest.display(), files, "working copy ready");
    Ok(files)
}

fn is_pruned(entry: &DirEntry, pruned: &[PathBuf]) -> bool {
    let name = entry.file_name().to_string_lossy();
    SKIPPED_NAMES.contains(&name.as_ref()) || pruned.iter().any(|p| p == entry.path())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(from)?, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    if from.is_file() {
        std::fs::copy(from, to)?;
    } else {
        debug!(path = %from.display(), "skipping directory symlink");
    }
    Ok(())
}
