//! Durable work item storage.
//!
//! The store is the single source of truth and the only synchronization
//! point shared across worker processes: `claim_next` is atomic, so two
//! dispatchers racing for the queue never receive the same item.
//!
//! Two implementations ship: [`pg::PgStore`] for production (Postgres,
//! row-locked claims) and [`mem::MemStore`] for tests and in-process use.

pub mod mem;
pub mod pg;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{LastError, NewWorkItem, Outcome, Status, WorkItem, WorkItemId};

/// Storage contract for work items and their outcomes.
///
/// All status changes validate against the transition table and fail with
/// [`Error::InvalidTransition`] when the item is not in the expected state,
/// or [`Error::NotFound`] when the id is absent. Writes that touch an outcome
/// and its detail lines are transactional.
#[async_trait]
pub trait WorkStore: Send + Sync {
    /// Insert a new `PENDING` work item. Fails with [`Error::Duplicate`] if
    /// the idempotency key is already taken; the store is left unchanged.
    async fn enqueue(&self, new: NewWorkItem) -> Result<WorkItem>;

    /// Atomically claim the oldest eligible `PENDING` item: FIFO by
    /// `created_at`, ties broken by id ascending, items with an unexpired
    /// `not_before` skipped. The selected item flips to `IN_PROGRESS` and
    /// its attempt count increments in the same atomic operation. Returns
    /// `None` when nothing is claimable.
    async fn claim_next(&self) -> Result<Option<WorkItem>>;

    /// Record success: `IN_PROGRESS -> SUCCESS`, persist the outcome and its
    /// lines, clear `last_error`. One transaction.
    async fn record_outcome(&self, id: WorkItemId, outcome: Outcome) -> Result<()>;

    /// Record a terminal failure. `status` must be one of the failed
    /// terminal statuses.
    async fn record_failure(
        &self,
        id: WorkItemId,
        status: Status,
        error: LastError,
    ) -> Result<()>;

    /// Retry loop-back: `IN_PROGRESS -> PENDING`, keeping the incremented
    /// attempt count, recording the error, and gating the item behind
    /// `not_before`.
    async fn release_for_retry(
        &self,
        id: WorkItemId,
        error: LastError,
        not_before: DateTime<Utc>,
    ) -> Result<()>;

    /// Read-only lookup.
    async fn get(&self, id: WorkItemId) -> Result<WorkItem>;

    /// The outcome for an item, if it has succeeded.
    async fn get_outcome(&self, id: WorkItemId) -> Result<Option<Outcome>>;

    /// Watchdog: flip `IN_PROGRESS` items whose last update is older than
    /// `stuck_for` back to `PENDING` so a crashed worker cannot strand a
    /// claim. Returns the reclaimed ids.
    async fn reclaim_stale(&self, stuck_for: Duration) -> Result<Vec<WorkItemId>>;

    /// Operator listing, newest first.
    async fn list(&self, status: Option<Status>, limit: i64) -> Result<Vec<WorkItem>>;
}

/// Validate a status transition, returning an error if disallowed.
pub(crate) fn validate_transition(from: Status, to: Status) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}

/// The error message recorded on watchdog-reclaimed items.
pub(crate) fn stale_claim_error(stuck_for: Duration) -> LastError {
    LastError {
        kind: crate::error::ErrorKind::Transient,
        message: format!(
            "claim reclaimed after worker made no progress for {}s",
            stuck_for.as_secs()
        ),
    }
}
