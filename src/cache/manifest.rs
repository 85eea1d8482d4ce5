//! Side manifest recording the original store-time paths
//!
//! The manifest is the last entry of every archive (`metadata.json`). Entry
//! `i` of `paths` owns the `{i:04}/` namespace inside the archive.

use crate::error::{StowawayError, StowawayResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the manifest entry inside the archive
pub const MANIFEST_NAME: &str = "metadata.json";

/// Directory prefix owning the entries of the `index`-th source path
pub fn index_dir(index: usize) -> String {
    format!("{:04}", index)
}

/// Ordered list of original source paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub paths: Vec<String>,
}

impl Manifest {
    pub fn new(paths: Vec<String>) -> Self {
        Self { paths }
    }

    /// Compact JSON body, e.g. `{"paths":["foo","abc/def"]}`
    pub fn to_json(&self) -> StowawayResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> StowawayResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| StowawayError::CorruptArchive(format!("invalid {}: {}", MANIFEST_NAME, e)))
    }

    /// Read the manifest left in an extraction root
    pub fn read_from(root: &Path) -> StowawayResult<Self> {
        let path = root.join(MANIFEST_NAME);
        let bytes = fs::read(&path)
            .map_err(|e| StowawayError::extraction(format!("reading {}", path.display()), e))?;
        Self::from_json(&bytes)
    }

    /// Location of the extracted subtree for `index` under `root`
    pub fn extracted_path(&self, root: &Path, index: usize) -> StowawayResult<PathBuf> {
        let original = self.paths.get(index).ok_or_else(|| {
            StowawayError::Internal(format!("manifest has no path at index {}", index))
        })?;
        let base = Path::new(original).file_name().ok_or_else(|| {
            StowawayError::CorruptArchive(format!("manifest path {:?} has no final component", original))
        })?;
        Ok(root.join(index_dir(index)).join(base))
    }
}
