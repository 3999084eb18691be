//! In-process store backed by a mutex-guarded map.
//!
//! Same contract and transition checks as the Postgres store; the mutex makes
//! every operation atomic with respect to concurrent claimants. Used by the
//! test suite and anywhere a durable backend is not wanted.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::model::{LastError, NewWorkItem, Outcome, Status, WorkItem, WorkItemId};

use super::{WorkStore, stale_claim_error, validate_transition};

#[derive(Default)]
struct Inner {
    items: HashMap<WorkItemId, WorkItem>,
    outcomes: HashMap<WorkItemId, Outcome>,
}

/// In-memory [`WorkStore`].
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkStore for MemStore {
    async fn enqueue(&self, new: NewWorkItem) -> Result<WorkItem> {
        let mut inner = self.inner.lock().await;

        if let Some(ref key) = new.idempotency_key
            && inner
                .items
                .values()
                .any(|item| item.idempotency_key.as_ref() == Some(key))
        {
            return Err(Error::Duplicate(key.clone()));
        }

        let now = Utc::now();
        let item = WorkItem {
            id: WorkItemId::new(),
            payload: new.payload,
            idempotency_key: new.idempotency_key,
            status: Status::Pending,
            attempts: 0,
            last_error: None,
            not_before: None,
            created_at: now,
            updated_at: now,
        };
        inner.items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn claim_next(&self) -> Result<Option<WorkItem>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        // Oldest eligible pending item: FIFO by created_at, ties by id.
        let next_id = inner
            .items
            .values()
            .filter(|item| item.status == Status::Pending)
            .filter(|item| item.not_before.is_none_or(|nb| nb <= now))
            .min_by_key(|item| (item.created_at, item.id))
            .map(|item| item.id);

        let Some(id) = next_id else {
            return Ok(None);
        };

        let item = inner
            .items
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        item.status = Status::InProgress;
        item.attempts += 1;
        item.not_before = None;
        item.updated_at = now;
        Ok(Some(item.clone()))
    }

    async fn record_outcome(&self, id: WorkItemId, outcome: Outcome) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let item = inner
            .items
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        validate_transition(item.status, Status::Success)?;

        item.status = Status::Success;
        item.last_error = None;
        item.updated_at = Utc::now();
        inner.outcomes.insert(id, outcome);
        Ok(())
    }

    async fn record_failure(
        &self,
        id: WorkItemId,
        status: Status,
        error: LastError,
    ) -> Result<()> {
        if !status.is_failure() {
            return Err(Error::Other(format!(
                "record_failure requires a failed terminal status, got {status}"
            )));
        }
        let mut inner = self.inner.lock().await;
        let item = inner
            .items
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        validate_transition(item.status, status)?;

        item.status = status;
        item.last_error = Some(error);
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn release_for_retry(
        &self,
        id: WorkItemId,
        error: LastError,
        not_before: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let item = inner
            .items
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        validate_transition(item.status, Status::Pending)?;

        item.status = Status::Pending;
        item.last_error = Some(error);
        item.not_before = Some(not_before);
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, id: WorkItemId) -> Result<WorkItem> {
        let inner = self.inner.lock().await;
        inner
            .items
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn get_outcome(&self, id: WorkItemId) -> Result<Option<Outcome>> {
        let inner = self.inner.lock().await;
        if !inner.items.contains_key(&id) {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(inner.outcomes.get(&id).cloned())
    }

    async fn reclaim_stale(&self, stuck_for: Duration) -> Result<Vec<WorkItemId>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let cutoff = now - chrono::Duration::seconds(stuck_for.as_secs() as i64);

        let mut reclaimed = Vec::new();
        for item in inner.items.values_mut() {
            if item.status == Status::InProgress && item.updated_at < cutoff {
                item.status = Status::Pending;
                item.last_error = Some(stale_claim_error(stuck_for));
                item.updated_at = now;
                reclaimed.push(item.id);
            }
        }
        reclaimed.sort();
        Ok(reclaimed)
    }

    async fn list(&self, status: Option<Status>, limit: i64) -> Result<Vec<WorkItem>> {
        let inner = self.inner.lock().await;
        let mut items: Vec<WorkItem> = inner
            .items
            .values()
            .filter(|item| status.is_none_or(|s| item.status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }
}
