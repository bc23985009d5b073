//! Filesystem sink
//!
//! Writes each article as pretty-printed JSON under the output root. Files are
//! written to a temp file in the batch directory and renamed into place, so a
//! reader never sees a half-written article.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::path::ArtifactNaming;
use super::{ArtifactSink, SinkError, SinkResult};
use crate::processor::ProcessedArticle;

const PROBE_FILE: &str = ".write-probe";

/// Sink writing artifacts below a root directory
#[derive(Debug, Clone)]
pub struct FsSink {
    root: PathBuf,
    naming: ArtifactNaming,
}

impl FsSink {
    /// Sink rooted at `root` with the default naming scheme
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            naming: ArtifactNaming::default(),
        }
    }

    /// Override the naming scheme
    pub fn with_naming(mut self, naming: ArtifactNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Output root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of an artifact
    pub fn artifact_path(&self, batch_number: u64, index: u64) -> PathBuf {
        self.root.join(self.naming.relative_path(batch_number, index))
    }
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl ArtifactSink for FsSink {
    async fn upload_batch(
        &self,
        items: &[ProcessedArticle],
        batch_number: u64,
        start_index: u64,
    ) -> SinkResult<usize> {
        let batch_dir = self.root.join(self.naming.batch_dir(batch_number));

        let mut documents = Vec::with_capacity(items.len());
        for (offset, item) in items.iter().enumerate() {
            let path = batch_dir.join(self.naming.file_name(start_index + offset as u64));
            match serde_json::to_vec_pretty(item) {
                Ok(bytes) => documents.push((item.title.clone(), path, bytes)),
                Err(e) => warn!(title = %item.title, error = %e, "Failed to serialize article"),
            }
        }

        let dir = batch_dir.clone();
        let stored = tokio::task::spawn_blocking(move || -> SinkResult<usize> {
            std::fs::create_dir_all(&dir)
                .map_err(|e| SinkError::IoError(format!("Failed to create {}: {e}", dir.display())))?;

            let mut stored = 0;
            for (title, path, bytes) in documents {
                match write_atomic(&dir, &path, &bytes) {
                    Ok(()) => {
                        debug!(title = %title, path = %path.display(), "Article written");
                        stored += 1;
                    }
                    Err(e) => warn!(title = %title, path = %path.display(), error = %e, "Failed to write article"),
                }
            }
            Ok(stored)
        })
        .await
        .map_err(|e| SinkError::IoError(format!("Writer task failed: {e}")))??;

        info!(
            batch_number,
            stored,
            total = items.len(),
            dir = %batch_dir.display(),
            "Batch written"
        );
        Ok(stored)
    }

    async fn test_connection(&self) -> bool {
        let root = self.root.clone();
        let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&root)?;
            let probe = root.join(PROBE_FILE);
            std::fs::write(&probe, b"ok")?;
            std::fs::remove_file(&probe)
        })
        .await;

        match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(root = %self.root.display(), error = %e, "Output directory is not writable");
                false
            }
            Err(e) => {
                warn!(error = %e, "Sink probe task failed");
                false
            }
        }
    }
}
