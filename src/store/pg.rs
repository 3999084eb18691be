//! Postgres store via SQLx.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so any number of worker processes can
//! poll the same queue without handing the same item to two of them. Outcome
//! writes (header + detail lines + status flip) share one transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    LastError, NewWorkItem, Outcome, OutcomeLine, Status, TaskPayload, WorkItem, WorkItemId,
};
use crate::telemetry::metrics;

use super::{WorkStore, stale_claim_error};

/// Postgres-backed [`WorkStore`]. Owns the connection pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// A conditional status update matched zero rows: report whether the item
    /// is missing or merely in the wrong state.
    async fn transition_failed(&self, id: WorkItemId, to: Status) -> Result<()> {
        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM work_items WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        match current {
            None => Err(Error::NotFound(format!("work item {id}"))),
            Some((status,)) => Err(Error::InvalidTransition {
                from: status.parse()?,
                to,
            }),
        }
    }
}

#[async_trait]
impl WorkStore for PgStore {
    async fn enqueue(&self, new: NewWorkItem) -> Result<WorkItem> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let kind = new.payload.label();
        let payload = serde_json::to_value(&new.payload)
            .map_err(|e| Error::Other(format!("serialize payload: {e}")))?;

        if let Some(ref key) = new.idempotency_key {
            // The partial unique index on idempotency_key rejects concurrent
            // inserts with the same key; DO NOTHING leaves the store untouched.
            let inserted: Option<(Uuid,)> = sqlx::query_as(
                "INSERT INTO work_items (id, task_kind, payload, idempotency_key, status, attempts, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, 'PENDING', 0, $5, $5)
                 ON CONFLICT (idempotency_key) WHERE idempotency_key IS NOT NULL
                 DO NOTHING
                 RETURNING id",
            )
            .bind(id)
            .bind(kind)
            .bind(&payload)
            .bind(key)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

            if inserted.is_none() {
                metrics::tasks_submitted().add(
                    1,
                    &[
                        KeyValue::new("kind", kind),
                        KeyValue::new("result", "duplicate"),
                    ],
                );
                return Err(Error::Duplicate(key.clone()));
            }
        } else {
            sqlx::query(
                "INSERT INTO work_items (id, task_kind, payload, idempotency_key, status, attempts, created_at, updated_at)
                 VALUES ($1, $2, $3, NULL, 'PENDING', 0, $4, $4)",
            )
            .bind(id)
            .bind(kind)
            .bind(&payload)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }

        metrics::tasks_submitted().add(
            1,
            &[KeyValue::new("kind", kind), KeyValue::new("result", "ok")],
        );

        self.get(WorkItemId(id)).await
    }

    async fn claim_next(&self) -> Result<Option<WorkItem>> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let row: Option<WorkItemRow> = sqlx::query_as(
            "SELECT id, payload, idempotency_key, status, attempts, last_error_kind, last_error_message, not_before, created_at, updated_at
             FROM work_items
             WHERE status = 'PENDING' AND (not_before IS NULL OR not_before <= now())
             ORDER BY created_at ASC, id ASC
             LIMIT 1
             FOR UPDATE SKIP LOCKED",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query(
            "UPDATE work_items
             SET status = 'IN_PROGRESS', attempts = attempts + 1, not_before = NULL, updated_at = $1
             WHERE id = $2",
        )
        .bind(now)
        .bind(row.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut item = row.try_into_work_item()?;
        item.status = Status::InProgress;
        item.attempts += 1;
        item.not_before = None;
        item.updated_at = now;
        Ok(Some(item))
    }

    async fn record_outcome(&self, id: WorkItemId, outcome: Outcome) -> Result<()> {
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let rows_affected = sqlx::query(
            "UPDATE work_items
             SET status = 'SUCCESS', last_error_kind = NULL, last_error_message = NULL, updated_at = $1
             WHERE id = $2 AND status = 'IN_PROGRESS'",
        )
        .bind(now)
        .bind(id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            tx.rollback().await?;
            return self.transition_failed(id, Status::Success).await;
        }

        sqlx::query(
            "INSERT INTO outcomes (work_item_id, data, duration_ms, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id.0)
        .bind(&outcome.data)
        .bind(outcome.duration_ms as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for line in &outcome.lines {
            sqlx::query(
                "INSERT INTO outcome_lines (work_item_id, position, label, data)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(id.0)
            .bind(line.position as i32)
            .bind(&line.label)
            .bind(&line.data)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
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

        let rows_affected = sqlx::query(
            "UPDATE work_items
             SET status = $1, last_error_kind = $2, last_error_message = $3, updated_at = $4
             WHERE id = $5 AND status = 'IN_PROGRESS'",
        )
        .bind(status.to_string())
        .bind(error.kind.to_string())
        .bind(&error.message)
        .bind(Utc::now())
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return self.transition_failed(id, status).await;
        }
        Ok(())
    }

    async fn release_for_retry(
        &self,
        id: WorkItemId,
        error: LastError,
        not_before: DateTime<Utc>,
    ) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE work_items
             SET status = 'PENDING', last_error_kind = $1, last_error_message = $2, not_before = $3, updated_at = $4
             WHERE id = $5 AND status = 'IN_PROGRESS'",
        )
        .bind(error.kind.to_string())
        .bind(&error.message)
        .bind(not_before)
        .bind(Utc::now())
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return self.transition_failed(id, Status::Pending).await;
        }
        Ok(())
    }

    async fn get(&self, id: WorkItemId) -> Result<WorkItem> {
        let row: Option<WorkItemRow> = sqlx::query_as(
            "SELECT id, payload, idempotency_key, status, attempts, last_error_kind, last_error_message, not_before, created_at, updated_at
             FROM work_items WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("work item {id}")))?
            .try_into_work_item()
    }

    async fn get_outcome(&self, id: WorkItemId) -> Result<Option<Outcome>> {
        let header: Option<(serde_json::Value, i64)> =
            sqlx::query_as("SELECT data, duration_ms FROM outcomes WHERE work_item_id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;

        let Some((data, duration_ms)) = header else {
            // No outcome — still distinguish a missing item from a live one.
            self.get(id).await?;
            return Ok(None);
        };

        let lines: Vec<(i32, String, serde_json::Value)> = sqlx::query_as(
            "SELECT position, label, data FROM outcome_lines
             WHERE work_item_id = $1 ORDER BY position ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Outcome {
            data,
            lines: lines
                .into_iter()
                .map(|(position, label, data)| OutcomeLine {
                    position: position as u32,
                    label,
                    data,
                })
                .collect(),
            duration_ms: duration_ms as u64,
        }))
    }

    async fn reclaim_stale(&self, stuck_for: Duration) -> Result<Vec<WorkItemId>> {
        let error = stale_claim_error(stuck_for);
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE work_items
             SET status = 'PENDING', last_error_kind = $1, last_error_message = $2, updated_at = now()
             WHERE status = 'IN_PROGRESS' AND updated_at < now() - make_interval(secs => $3)
             RETURNING id",
        )
        .bind(error.kind.to_string())
        .bind(&error.message)
        .bind(stuck_for.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| WorkItemId(id)).collect())
    }

    async fn list(&self, status: Option<Status>, limit: i64) -> Result<Vec<WorkItem>> {
        let rows: Vec<WorkItemRow> = sqlx::query_as(
            "SELECT id, payload, idempotency_key, status, attempts, last_error_kind, last_error_message, not_before, created_at, updated_at
             FROM work_items
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY created_at DESC, id DESC
             LIMIT $2",
        )
        .bind(status.map(|s| s.to_string()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|row| row.try_into_work_item()).collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkItemRow {
    id: Uuid,
    payload: serde_json::Value,
    idempotency_key: Option<String>,
    status: String,
    attempts: i32,
    last_error_kind: Option<String>,
    last_error_message: Option<String>,
    not_before: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkItemRow {
    fn try_into_work_item(self) -> Result<WorkItem> {
        let payload: TaskPayload = serde_json::from_value(self.payload)
            .map_err(|e| Error::Other(format!("bad payload for work item {}: {e}", self.id)))?;

        let last_error = match (self.last_error_kind, self.last_error_message) {
            (Some(kind), Some(message)) => Some(LastError {
                kind: kind.parse()?,
                message,
            }),
            _ => None,
        };

        Ok(WorkItem {
            id: WorkItemId(self.id),
            payload,
            idempotency_key: self.idempotency_key,
            status: self.status.parse()?,
            attempts: self.attempts as u32,
            last_error,
            not_before: self.not_before,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
