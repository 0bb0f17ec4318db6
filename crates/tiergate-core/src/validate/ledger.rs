//! Persistent build state: recorded artifact hashes and size baselines.
//!
//! Both files live under the project's state directory and are plain JSON
//! maps so they can be inspected and committed.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fsutil;
use crate::tier::TierName;

pub const DETERMINISM_FILE: &str = "determinism.json";
pub const SIZE_BASELINE_FILE: &str = "size-baseline.json";

fn load_json<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub sha256: String,
    pub recorded_at: DateTime<Utc>,
}

/// Last artifact hash per `revision/tier/platform`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterminismLedger {
    #[serde(default)]
    pub entries: BTreeMap<String, LedgerEntry>,
}

impl DeterminismLedger {
    pub fn key(revision: &str, tier: TierName, platform: &str) -> String {
        format!("{revision}/{tier}/{platform}")
    }

    /// A missing file is an empty ledger.
    pub fn load(state_dir: &Path) -> Result<Self> {
        load_json(&state_dir.join(DETERMINISM_FILE))
    }

    pub fn save(&self, state_dir: &Path) -> Result<()> {
        fsutil::write_json(&state_dir.join(DETERMINISM_FILE), self)
    }

    pub fn get(&self, revision: &str, tier: TierName, platform: &str) -> Option<&LedgerEntry> {
        self.entries.get(&Self::key(revision, tier, platform))
    }

    pub fn record(&mut self, revision: &str, tier: TierName, platform: &str, sha256: &str) {
        self.entries.insert(
            Self::key(revision, tier, platform),
            LedgerEntry {
                sha256: sha256.to_string(),
                recorded_at: Utc::now(),
            },
        );
    }
}

/// Recorded artifact size in bytes per `tier/platform`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeBaseline {
    #[serde(default)]
    pub entries: BTreeMap<String, u64>,
}

impl SizeBaseline {
    pub fn key(tier: TierName, platform: &str) -> String {
        format!("{tier}/{platform}")
    }

    pub fn load(state_dir: &Path) -> Result<Self> {
        load_json(&state_dir.join(SIZE_BASELINE_FILE))
    }

    pub fn save(&self, state_dir: &Path) -> Result<()> {
        fsutil::write_json(&state_dir.join(SIZE_BASELINE_FILE), self)
    }

    pub fn get(&self, tier: TierName, platform: &str) -> Option<u64> {
        self.entries.get(&Self::key(tier, platform)).copied()
    }

    pub fn record(&mut self, tier: TierName, platform: &str, size_bytes: u64) {
        self.entries.insert(Self::key(tier, platform), size_bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DeterminismLedger::load(dir.path()).unwrap().entries.is_empty());
        assert!(SizeBaseline::load(dir.path()).unwrap().entries.is_empty());
    }

    #[test]
    fn ledger_persists_by_revision_tier_platform() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = DeterminismLedger::default();
        ledger.record("abc", TierName::Community, "linux-x86_64", "ff00");
        ledger.save(dir.path()).unwrap();

        let loaded = DeterminismLedger::load(dir.path()).unwrap();
        assert_eq!(
            loaded.get("abc", TierName::Community, "linux-x86_64").map(|e| e.sha256.as_str()),
            Some("ff00")
        );
        assert!(loaded.get("abc", TierName::Enterprise, "linux-x86_64").is_none());
        assert!(loaded.get("def", TierName::Community, "linux-x86_64").is_none());
    }

    #[test]
    fn baseline_roundtrip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut baseline = SizeBaseline::default();
        baseline.record(TierName::Enterprise, "macos-aarch64", 1000);
        baseline.record(TierName::Enterprise, "macos-aarch64", 1200);
        baseline.save(dir.path()).unwrap();
        assert_eq!(
            SizeBaseline::load(dir.path()).unwrap().get(TierName::Enterprise, "macos-aarch64"),
            Some(1200)
        );
    }

    #[test]
    fn corrupt_ledger_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DETERMINISM_FILE), "{").unwrap();
        assert!(DeterminismLedger::load(dir.path()).is_err());
    }
}
