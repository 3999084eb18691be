//! Diagnostic artifact capture.
//!
//! On a failed attempt the executor asks the portal for whatever evidence it
//! can produce (screenshot, page source) and hands the blobs here. Artifact
//! storage is best-effort: failures are logged, never propagated, and never
//! change the fate of a work item.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::Result;
use crate::model::WorkItemId;

/// One captured diagnostic blob.
#[derive(Debug, Clone)]
pub struct ArtifactBlob {
    pub kind: ArtifactKind,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Screenshot,
    PageSource,
}

impl ArtifactKind {
    pub fn ext(self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "png",
            ArtifactKind::PageSource => "html",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArtifactKind::Screenshot => "screenshot",
            ArtifactKind::PageSource => "page_source",
        };
        write!(f, "{s}")
    }
}

/// Retrievable reference to a stored artifact.
#[derive(Debug, Clone)]
pub struct ArtifactRef {
    pub location: String,
}

/// Where captured artifacts go.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn store(
        &self,
        id: WorkItemId,
        captured_at: DateTime<Utc>,
        blob: ArtifactBlob,
    ) -> Result<ArtifactRef>;
}

/// Filesystem sink: `<dir>/error_<id>_<timestamp>.<ext>`.
pub struct FsArtifactSink {
    dir: PathBuf,
}

impl FsArtifactSink {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ArtifactSink for FsArtifactSink {
    async fn store(
        &self,
        id: WorkItemId,
        captured_at: DateTime<Utc>,
        blob: ArtifactBlob,
    ) -> Result<ArtifactRef> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let filename = format!(
            "error_{id}_{}.{}",
            captured_at.format("%Y%m%d_%H%M%S"),
            blob.kind.ext()
        );
        let path = self.dir.join(filename);
        tokio::fs::write(&path, &blob.bytes).await?;

        debug!(id = %id, kind = %blob.kind, path = %path.display(), "artifact stored");
        Ok(ArtifactRef {
            location: path.display().to_string(),
        })
    }
}
