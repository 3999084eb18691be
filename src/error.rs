//! Error types for portalq.
//!
//! Two layers: [`Error`] is the storage/infrastructure error returned by the
//! store and the binary plumbing; [`TaskError`] is the closed execution
//! taxonomy produced by the executor and the portal collaborator, and is the
//! only thing the retry policy ever looks at.

use thiserror::Error;

use crate::model::Status;

#[derive(Debug, Error)]
pub enum Error {
    #[error("work item not found: {0}")]
    NotFound(String),

    #[error("duplicate work item for idempotency key {0:?}")]
    Duplicate(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of failure classifications.
///
/// Every failure out of the executor or the portal collaborator maps to
/// exactly one of these before the dispatcher sees it. The retry policy is a
/// pure function of the kind and the attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The payload itself is malformed or breaks a business rule. Never retried.
    Validation,
    /// The portal processed the request and said no (e.g. unknown member).
    /// Definitive, never retried.
    PortalBusiness,
    /// The automation could not complete a known step — the portal's
    /// structure no longer matches. Needs a human, never auto-retried.
    PortalChanged,
    /// Timing, connectivity, or session loss. Retried with backoff.
    Transient,
    /// Anything we could not classify. Not retried — we don't understand it.
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::PortalBusiness => "portal_business",
            ErrorKind::PortalChanged => "portal_changed",
            ErrorKind::Transient => "transient",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "validation" => Ok(ErrorKind::Validation),
            "portal_business" => Ok(ErrorKind::PortalBusiness),
            "portal_changed" => Ok(ErrorKind::PortalChanged),
            "transient" => Ok(ErrorKind::Transient),
            "unknown" => Ok(ErrorKind::Unknown),
            _ => Err(Error::Other(format!("unknown error kind: {s}"))),
        }
    }
}

/// Classified execution failure.
///
/// `SessionExpired` is a transient failure that additionally tells the
/// executor the cached portal session is dead and must be invalidated before
/// the retry; it classifies as [`ErrorKind::Transient`].
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("portal business error: {0}")]
    PortalBusiness(String),

    #[error("portal structure changed: {0}")]
    PortalChanged(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("portal session expired: {0}")]
    SessionExpired(String),

    #[error("unclassified failure: {0}")]
    Unknown(String),
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Validation(_) => ErrorKind::Validation,
            TaskError::PortalBusiness(_) => ErrorKind::PortalBusiness,
            TaskError::PortalChanged(_) => ErrorKind::PortalChanged,
            TaskError::Transient(_) | TaskError::SessionExpired(_) => ErrorKind::Transient,
            TaskError::Unknown(_) => ErrorKind::Unknown,
        }
    }
}
