//! Task execution span helpers.
//!
//! Provides span creation and status-change recording for work items
//! flowing through the dispatcher.

use tracing::Span;
use uuid::Uuid;

/// Start a span for work item execution.
pub fn start_task_span(kind: &str, work_id: &Uuid) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.kind" = kind,
        "task.id" = %work_id,
    )
}

/// Record a status change event on the given span.
///
/// Emits a tracing `info` event scoped to the given span.
pub fn record_status_change(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "status_change");
    });
}
