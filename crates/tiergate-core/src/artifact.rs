//! Build artifacts. Hash and size are always computed from disk.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::bom::BOM_FILE;
use crate::error::{Result, TiergateError};
use crate::fsutil;
use crate::tier::TierName;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildArtifact {
    pub artifact_type: String,
    pub tier: TierName,
    pub platform: String,
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
    pub build_timestamp: DateTime<Utc>,
    pub source_revision: String,
    pub bill_of_materials_path: Option<PathBuf>,
}

impl BuildArtifact {
    /// Describe the file (or directory) at `path`.
    pub fn from_file(
        artifact_type: &str,
        tier: TierName,
        platform: &str,
        path: &Path,
        source_revision: &str,
        bill_of_materials_path: Option<PathBuf>,
    ) -> Result<Self> {
        let (sha256, size_bytes) = hash_path(path)?;
        Ok(Self {
            artifact_type: artifact_type.to_string(),
            tier,
            platform: platform.to_string(),
            path: path.to_path_buf(),
            sha256,
            size_bytes,
            build_timestamp: Utc::now(),
            source_revision: source_revision.to_string(),
            bill_of_materials_path,
        })
    }

    /// Rebase `path` and the BOM path after the output directory moved.
    pub fn relocate(&mut self, from: &Path, to: &Path) {
        if let Ok(rest) = self.path.strip_prefix(from) {
            self.path = to.join(rest);
        }
        if let Some(bom) = &self.bill_of_materials_path {
            if let Ok(rest) = bom.strip_prefix(from) {
                self.bill_of_materials_path = Some(to.join(rest));
            }
        }
    }

    pub fn short_sha(&self) -> &str {
        &self.sha256[..self.sha256.len().min(12)]
    }
}

/// SHA-256 and byte size of a file, or of a directory tree.
///
/// A directory hashes the sorted list of `relative/path\0<file sha256>\n`
/// records, so the result depends only on names and contents. Its top-level
/// `bom.json` is written after hashing and is left out.
pub fn hash_path(path: &Path) -> Result<(String, u64)> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        TiergateError::Io(std::io::Error::new(
            e.kind(),
            format!("artifact {}: {e}", path.display()),
        ))
    })?;

    if metadata.is_file() {
        let bytes = std::fs::read(path)?;
        return Ok((fsutil::sha256_hex(&bytes), bytes.len() as u64));
    }

    let mut hasher = Sha256::new();
    let mut total = 0u64;
    for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        if !entry.file_type().is_file() || is_bill_of_materials(&entry) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(path)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let bytes = std::fs::read(entry.path())?;
        total += bytes.len() as u64;
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update(fsutil::sha256_hex(&bytes).as_bytes());
        hasher.update(b"\n");
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// The bill of materials Tiergate writes at the top of an output directory.
pub(crate) fn is_bill_of_materials(entry: &walkdir::DirEntry) -> bool {
    entry.depth() == 1 && entry.file_name() == BOM_FILE
}
