//! Task execution: one work item, one attempt, one classified result.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{debug, warn};

use crate::artifacts::ArtifactSink;
use crate::error::TaskError;
use crate::model::{Outcome, WorkItem};
use crate::portal::Portal;
use crate::session::SessionManager;
use crate::telemetry::metrics;

/// Drives the portal collaborator for a single claimed work item.
pub struct TaskExecutor<P: Portal> {
    portal: Arc<P>,
    sessions: Arc<SessionManager<P>>,
    artifacts: Arc<dyn ArtifactSink>,
}

impl<P: Portal> TaskExecutor<P> {
    pub fn new(
        portal: Arc<P>,
        sessions: Arc<SessionManager<P>>,
        artifacts: Arc<dyn ArtifactSink>,
    ) -> Self {
        Self {
            portal,
            sessions,
            artifacts,
        }
    }

    /// Run one attempt. Classified failures come back as [`TaskError`]; the
    /// caller (the dispatcher) applies the retry policy.
    pub async fn execute(&self, item: &WorkItem) -> Result<Outcome, TaskError> {
        // Shape check first — a malformed payload must never touch the
        // session or the portal.
        item.payload.validate()?;

        let started = Instant::now();
        let mut lease = self.sessions.acquire().await?;

        match self.portal.perform(lease.handle(), &item.payload).await {
            Ok(report) => Ok(report.into_outcome(started.elapsed().as_millis() as u64)),
            Err(TaskError::SessionExpired(msg)) => {
                // The session died under us. Drop it so the retry gets a
                // fresh login; the artifacts would just show a logout page.
                lease.invalidate();
                Err(TaskError::Transient(format!(
                    "portal session expired mid-task: {msg}"
                )))
            }
            Err(err) => {
                self.capture_failure_artifacts(item, lease.handle()).await;
                Err(err)
            }
        }
    }

    /// Best effort: grab whatever evidence the portal can produce and store
    /// it keyed by work item id + timestamp. Never fails the task.
    async fn capture_failure_artifacts(&self, item: &WorkItem, session: &P::Session) {
        let blobs = match self.portal.capture_artifacts(session).await {
            Ok(blobs) => blobs,
            Err(err) => {
                metrics::artifact_failures().add(1, &[KeyValue::new("stage", "capture")]);
                warn!(id = %item.id, "artifact capture failed: {err}");
                return;
            }
        };

        let captured_at = Utc::now();
        for blob in blobs {
            let kind = blob.kind;
            match self.artifacts.store(item.id, captured_at, blob).await {
                Ok(artifact) => {
                    debug!(id = %item.id, kind = %kind, location = %artifact.location, "artifact saved")
                }
                Err(err) => {
                    metrics::artifact_failures().add(1, &[KeyValue::new("stage", "store")]);
                    warn!(id = %item.id, kind = %kind, "artifact write failed: {err}");
                }
            }
        }
    }
}
