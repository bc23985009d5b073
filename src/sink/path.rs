//! Artifact naming
//!
//! Artifacts are laid out as `{dir_prefix}{batch:0W}/{file_prefix}{index:0W}.json`,
//! e.g. `batch_001/article_000042.json`. Names are deterministic so a repeated
//! upload of the same batch overwrites instead of duplicating.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Naming scheme for batch directories and article files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactNaming {
    /// Batch directory prefix
    pub directory_prefix: String,
    /// Article file prefix
    pub file_prefix: String,
    /// Zero-padded width of the batch number
    pub batch_width: usize,
    /// Zero-padded width of the item index
    pub index_width: usize,
}

impl Default for ArtifactNaming {
    fn default() -> Self {
        Self {
            directory_prefix: "batch_".to_string(),
            file_prefix: "article_".to_string(),
            batch_width: 3,
            index_width: 6,
        }
    }
}

impl ArtifactNaming {
    /// Directory name for a batch
    pub fn batch_dir(&self, batch_number: u64) -> String {
        format!(
            "{}{:0width$}",
            self.directory_prefix,
            batch_number,
            width = self.batch_width
        )
    }

    /// File name for an item
    pub fn file_name(&self, index: u64) -> String {
        format!("{}{:0width$}.json", self.file_prefix, index, width = self.index_width)
    }

    /// Relative artifact path
    pub fn relative_path(&self, batch_number: u64, index: u64) -> PathBuf {
        PathBuf::from(self.batch_dir(batch_number)).join(self.file_name(index))
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), String> {
        for prefix in [&self.directory_prefix, &self.file_prefix] {
            if prefix.contains('/') || prefix.contains('\\') || prefix.contains("..") {
                return Err(format!("artifact prefix '{prefix}' must not contain path separators"));
            }
        }
        Ok(())
    }
}
