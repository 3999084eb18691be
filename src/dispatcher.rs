//! Queue dispatcher: claim, execute, retire.
//!
//! Any number of dispatcher loops (across processes) may run against the
//! same store; the store's atomic claim is the only cross-worker
//! synchronization. Within a worker the executor serializes on the session
//! manager. Retries never sleep a worker: a retried item goes back to
//! `PENDING` behind a `not_before` gate and surfaces on a later claim.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use opentelemetry::KeyValue;
use serde::Deserialize;
use tokio::sync::Notify;
use tracing::{Instrument, error, info, warn};

use crate::error::Result;
use crate::executor::TaskExecutor;
use crate::model::{LastError, Status, WorkItem, WorkItemId};
use crate::portal::Portal;
use crate::retry::{RetryPolicy, Verdict};
use crate::store::WorkStore;
use crate::telemetry::metrics;
use crate::telemetry::task::{record_status_change, start_task_span};

/// Dispatcher tunables. Loadable from the `[dispatcher]` table of the tuning
/// file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Idle sleep between polls when the queue is empty.
    pub poll_interval_secs: u64,
    /// An `IN_PROGRESS` item untouched for this long is assumed orphaned by
    /// a dead worker and reclaimed.
    pub stale_after_secs: u64,
    /// How often the watchdog sweep runs.
    pub reclaim_interval_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            stale_after_secs: 900,
            reclaim_interval_secs: 60,
        }
    }
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }
}

/// The dispatch loop: claim one item at a time, run it, persist the verdict.
pub struct Dispatcher<P: Portal> {
    store: Arc<dyn WorkStore>,
    executor: Arc<TaskExecutor<P>>,
    policy: RetryPolicy,
    config: DispatcherConfig,
    shutdown: Arc<Notify>,
    draining: Arc<AtomicBool>,
    last_reclaim: std::sync::Mutex<Option<Instant>>,
}

impl<P: Portal> Dispatcher<P> {
    pub fn new(
        store: Arc<dyn WorkStore>,
        executor: Arc<TaskExecutor<P>>,
        policy: RetryPolicy,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            executor,
            policy,
            config,
            shutdown: Arc::new(Notify::new()),
            draining: Arc::new(AtomicBool::new(false)),
            last_reclaim: std::sync::Mutex::new(None),
        }
    }

    /// A handle that can stop this dispatcher from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown: Arc::clone(&self.shutdown),
            draining: Arc::clone(&self.draining),
        }
    }

    /// Run until drained: stop claiming on shutdown, let the in-flight item
    /// reach a terminal outcome or a retry first.
    pub async fn run(&self) -> Result<()> {
        info!("dispatcher started");

        loop {
            if self.draining.load(Ordering::SeqCst) {
                info!("dispatcher drained, stopping");
                return Ok(());
            }

            self.maybe_reclaim().await;

            let worked = match self.process_one().await {
                Ok(worked) => worked,
                Err(e) => {
                    error!("dispatch pass failed: {e}");
                    false
                }
            };

            if !worked {
                tokio::select! {
                    _ = self.shutdown.notified() => {}
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                }
            }
        }
    }

    /// Claim and process a single item, then stop. Returns the item's id and
    /// final status, or `None` if the queue had nothing claimable.
    pub async fn run_once(&self) -> Result<Option<(WorkItemId, Status)>> {
        let Some(item) = self.store.claim_next().await? else {
            return Ok(None);
        };
        let id = item.id;
        self.process_claimed(item).await?;
        let item = self.store.get(id).await?;
        Ok(Some((id, item.status)))
    }

    /// Claim and process one item. Returns whether anything was claimed.
    async fn process_one(&self) -> Result<bool> {
        let Some(item) = self.store.claim_next().await? else {
            return Ok(false);
        };
        self.process_claimed(item).await?;
        Ok(true)
    }

    async fn process_claimed(&self, item: WorkItem) -> Result<()> {
        let kind = item.payload.label();
        let span = start_task_span(kind, &item.id.0);

        // Everything from execution through retirement runs inside the task span
        async {
            info!(id = %item.id, attempt = item.attempts, "task claimed");
            record_status_change(&span, "PENDING", "IN_PROGRESS");
            metrics::tasks_claimed().add(1, &[KeyValue::new("kind", kind)]);

            let started = Instant::now();
            let result = self.executor.execute(&item).await;
            let duration_ms = started.elapsed().as_millis() as f64;
            metrics::task_duration_ms().record(duration_ms, &[KeyValue::new("kind", kind)]);

            match result {
                Ok(outcome) => {
                    self.store.record_outcome(item.id, outcome).await?;
                    record_status_change(&span, "IN_PROGRESS", "SUCCESS");
                    info!(id = %item.id, duration_ms, "task succeeded");
                    metrics::tasks_finished().add(
                        1,
                        &[
                            KeyValue::new("kind", kind),
                            KeyValue::new("result", "success"),
                        ],
                    );
                }
                Err(task_err) => {
                    let last_error = LastError::from(&task_err);
                    match self.policy.decide(last_error.kind, item.attempts) {
                        Verdict::Retry { delay } => {
                            let not_before =
                                Utc::now() + chrono::Duration::seconds(delay.as_secs() as i64);
                            self.store
                                .release_for_retry(item.id, last_error, not_before)
                                .await?;
                            record_status_change(&span, "IN_PROGRESS", "PENDING");
                            warn!(
                                id = %item.id,
                                attempt = item.attempts,
                                delay_secs = delay.as_secs(),
                                error = %task_err,
                                "task failed, retry scheduled"
                            );
                            metrics::tasks_retried().add(1, &[KeyValue::new("kind", kind)]);
                        }
                        Verdict::Terminate { status } => {
                            self.store
                                .record_failure(item.id, status, last_error)
                                .await?;
                            record_status_change(&span, "IN_PROGRESS", &status.to_string());
                            error!(
                                id = %item.id,
                                status = %status,
                                attempts = item.attempts,
                                error = %task_err,
                                "task failed terminally"
                            );
                            metrics::tasks_finished().add(
                                1,
                                &[
                                    KeyValue::new("kind", kind),
                                    KeyValue::new("result", status.to_string()),
                                ],
                            );
                        }
                    }
                }
            }

            Ok(())
        }
        .instrument(span.clone())
        .await
    }

    /// Watchdog sweep, rate-limited to the configured cadence.
    async fn maybe_reclaim(&self) {
        let due = {
            let mut last = match self.last_reclaim.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let due = last.is_none_or(|at| at.elapsed() >= self.config.reclaim_interval());
            if due {
                *last = Some(Instant::now());
            }
            due
        };
        if !due {
            return;
        }

        match self.store.reclaim_stale(self.config.stale_after()).await {
            Ok(reclaimed) if !reclaimed.is_empty() => {
                metrics::tasks_reclaimed().add(reclaimed.len() as u64, &[]);
                for id in &reclaimed {
                    warn!(id = %id, "stale claim reclaimed");
                }
            }
            Ok(_) => {}
            Err(e) => error!("watchdog sweep failed: {e}"),
        }
    }
}

/// Stops a running dispatcher; claims cease, in-flight work finishes.
#[derive(Clone)]
pub struct ShutdownHandle {
    shutdown: Arc<Notify>,
    draining: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.draining.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }
}
