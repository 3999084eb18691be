//! Shared portal session lifecycle.
//!
//! Opening a portal session is the expensive part of every task (login,
//! navigation), so one live session is cached and reused across tasks. The
//! manager serializes access: a lease holds the slot's mutex, so within a
//! worker at most one executor touches the session at a time and concurrent
//! callers queue behind the lock. The session never leaks past a lease.

use std::sync::Arc;

use opentelemetry::KeyValue;
use serde::Deserialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::error::TaskError;
use crate::portal::Portal;
use crate::telemetry::metrics;

/// Session manager tunables. Loadable from the `[session]` table of the
/// tuning file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Consecutive failed session creations tolerated before the failure
    /// escalates from `Transient` to `Unknown`.
    pub creation_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            creation_retries: 2,
        }
    }
}

struct Slot<S> {
    session: Option<S>,
    /// Consecutive `open_session` failures. Reset on success.
    failed_opens: u32,
}

/// Owns the one cached automation session.
pub struct SessionManager<P: Portal> {
    portal: Arc<P>,
    slot: Mutex<Slot<P::Session>>,
    config: SessionConfig,
}

impl<P: Portal> SessionManager<P> {
    pub fn new(portal: Arc<P>, config: SessionConfig) -> Self {
        Self {
            portal,
            slot: Mutex::new(Slot {
                session: None,
                failed_opens: 0,
            }),
            config,
        }
    }

    /// Acquire exclusive access to a live session.
    ///
    /// Reuses the cached session when the portal's liveness probe passes;
    /// otherwise opens a fresh one. Blocks while another lease is held.
    /// Creation failures surface as `Transient` until `creation_retries`
    /// consecutive failures, then escalate to `Unknown`.
    pub async fn acquire(&self) -> Result<SessionLease<'_, P::Session>, TaskError> {
        let mut slot = self.slot.lock().await;

        if let Some(session) = slot.session.take() {
            if self.portal.check_session(&session).await {
                slot.session = Some(session);
                return Ok(SessionLease { slot });
            }
            info!("cached portal session is no longer live, reopening");
        }

        match self.portal.open_session().await {
            Ok(session) => {
                slot.failed_opens = 0;
                slot.session = Some(session);
                metrics::session_opens().add(1, &[KeyValue::new("result", "ok")]);
                info!("portal session opened");
                Ok(SessionLease { slot })
            }
            Err(err) => {
                slot.failed_opens += 1;
                metrics::session_opens().add(1, &[KeyValue::new("result", "error")]);
                warn!(
                    consecutive_failures = slot.failed_opens,
                    "portal session creation failed: {err}"
                );
                if slot.failed_opens > self.config.creation_retries {
                    Err(TaskError::Unknown(format!(
                        "portal session creation failed {} times in a row: {err}",
                        slot.failed_opens
                    )))
                } else {
                    Err(TaskError::Transient(format!(
                        "portal session creation failed: {err}"
                    )))
                }
            }
        }
    }
}

/// Exclusive access to the cached session for the duration of one task.
///
/// Dropping the lease releases the lock and leaves the session cached for
/// the next acquirer. Call [`invalidate`](Self::invalidate) first if the
/// session is known dead.
pub struct SessionLease<'a, S> {
    slot: MutexGuard<'a, Slot<S>>,
}

impl<S> SessionLease<'_, S> {
    pub fn handle(&self) -> &S {
        self.slot
            .session
            .as_ref()
            .expect("leased slot always holds a session")
    }

    /// Drop the cached session; the next `acquire` opens a replacement.
    pub fn invalidate(&mut self) {
        self.slot.session = None;
    }
}
