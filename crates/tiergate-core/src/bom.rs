//! Machine-readable bill of materials written next to each artifact.
//!
//! The document carries no wall-clock timestamp so that it is identical for
//! identical inputs.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TiergateError};
use crate::fsutil;
use crate::manifest::PackageManifest;
use crate::tier::TierName;

pub const BOM_SCHEMA: &str = "tiergate-bom/1";
pub const BOM_FILE: &str = "bom.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BomComponent {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillOfMaterials {
    pub schema: String,
    pub tier: TierName,
    pub platform: String,
    pub source_revision: String,
    pub components: Vec<BomComponent>,
}

impl BillOfMaterials {
    /// One component per manifest dependency, sorted by name.
    pub fn from_manifest(manifest: &PackageManifest, platform: &str, source_revision: &str) -> Self {
        let components = manifest
            .dependencies
            .iter()
            .map(|(name, version)| BomComponent {
                name: name.clone(),
                version: version.clone(),
                license: manifest.licenses.get(name).cloned(),
            })
            .collect();
        Self {
            schema: BOM_SCHEMA.to_string(),
            tier: manifest.tier,
            platform: platform.to_string(),
            source_revision: source_revision.to_string(),
            components,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fsutil::write_json(path, self)
    }

    /// Read and check the schema tag.
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let bom: BillOfMaterials = serde_json::from_slice(&bytes)?;
        if bom.schema != BOM_SCHEMA {
            return Err(TiergateError::config(format!(
                "{} has schema '{}', expected '{BOM_SCHEMA}'",
                path.display(),
                bom.schema
            )));
        }
        Ok(bom)
    }

    /// Declared license per component; `None` when undeclared.
    pub fn licenses(&self) -> BTreeMap<String, Option<String>> {
        self.components
            .iter()
            .map(|c| (c.name.clone(), c.license.clone()))
            .collect()
    }
}
