//! Metric instrument factories for portalq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"portalq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for portalq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("portalq")
}

/// Counter: work items submitted.
/// Labels: `kind`, `result` ("ok" | "duplicate").
pub fn tasks_submitted() -> Counter<u64> {
    meter()
        .u64_counter("portalq.tasks.submitted")
        .with_description("Number of work items submitted")
        .build()
}

/// Counter: successful claims.
/// Labels: `kind`.
pub fn tasks_claimed() -> Counter<u64> {
    meter()
        .u64_counter("portalq.tasks.claimed")
        .with_description("Number of work items claimed for execution")
        .build()
}

/// Counter: work items reaching a terminal status.
/// Labels: `kind`, `result` ("success" | terminal failure status).
pub fn tasks_finished() -> Counter<u64> {
    meter()
        .u64_counter("portalq.tasks.finished")
        .with_description("Number of work items reaching a terminal status")
        .build()
}

/// Counter: retry loop-backs scheduled by the retry policy.
/// Labels: `kind`.
pub fn tasks_retried() -> Counter<u64> {
    meter()
        .u64_counter("portalq.tasks.retried")
        .with_description("Number of work items sent back to the queue for retry")
        .build()
}

/// Counter: stale claims reclaimed by the watchdog.
pub fn tasks_reclaimed() -> Counter<u64> {
    meter()
        .u64_counter("portalq.tasks.reclaimed")
        .with_description("Number of stuck IN_PROGRESS items returned to the queue")
        .build()
}

/// Counter: portal session creations.
/// Labels: `result` ("ok" | "error").
pub fn session_opens() -> Counter<u64> {
    meter()
        .u64_counter("portalq.session.opens")
        .with_description("Number of portal session creation attempts")
        .build()
}

/// Counter: failed diagnostic artifact captures or writes.
/// Labels: `stage` ("capture" | "store").
pub fn artifact_failures() -> Counter<u64> {
    meter()
        .u64_counter("portalq.artifacts.failures")
        .with_description("Number of artifact capture or storage failures")
        .build()
}

/// Histogram: task execution duration in milliseconds.
/// Labels: `kind`.
pub fn task_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("portalq.task.duration_ms")
        .with_description("Task execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
