//! Core data model.
//!
//! A work item is one requested portal interaction. It has identity, an
//! immutable payload (one variant per supported workflow), lifecycle status,
//! and attempt history. A successful item gets exactly one outcome.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result, TaskError};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of portal work tracked by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier, assigned at enqueue time.
    pub id: WorkItemId,

    /// What to do at the portal. Immutable; the engine routes on the variant
    /// tag and never interprets the fields.
    pub payload: TaskPayload,

    /// Caller-defined uniqueness key. A second enqueue with the same key is
    /// rejected as a duplicate. None means no dedup.
    pub idempotency_key: Option<String>,

    /// Current lifecycle status.
    pub status: Status,

    /// Number of execution attempts so far. Incremented on every claim.
    pub attempts: u32,

    /// Classified error from the most recent failed attempt. Cleared on
    /// success.
    pub last_error: Option<LastError>,

    /// Retry gate: while set and in the future, a pending item is invisible
    /// to `claim_next`.
    pub not_before: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkItemId(pub Uuid);

impl WorkItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for WorkItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for WorkItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(s.parse()?))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a work item.
///
/// Monotonic except for the `InProgress -> Pending` loop-back, which only the
/// retry policy's verdict may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Waiting for a worker to claim it.
    Pending,
    /// Claimed by exactly one worker, execution underway.
    InProgress,
    /// Done; an outcome row exists. Terminal.
    Success,
    /// Payload rejected before touching the portal. Terminal.
    FailedValidation,
    /// The portal gave a definitive negative business answer. Terminal.
    FailedPortal,
    /// Technical failure: exhausted retries, structural portal change, or an
    /// unclassified error. Terminal, needs operator attention.
    FailedTech,
}

impl Status {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (InProgress, Success)
                | (InProgress, FailedValidation)
                | (InProgress, FailedPortal)
                | (InProgress, FailedTech)
                | (InProgress, Pending) // retry loop-back
        )
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Success | Status::FailedValidation | Status::FailedPortal | Status::FailedTech
        )
    }

    /// Is this one of the failed terminal statuses?
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Status::FailedValidation | Status::FailedPortal | Status::FailedTech
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Pending => "PENDING",
            Status::InProgress => "IN_PROGRESS",
            Status::Success => "SUCCESS",
            Status::FailedValidation => "FAILED_VALIDATION",
            Status::FailedPortal => "FAILED_PORTAL",
            Status::FailedTech => "FAILED_TECH",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(Status::Pending),
            "IN_PROGRESS" => Ok(Status::InProgress),
            "SUCCESS" => Ok(Status::Success),
            "FAILED_VALIDATION" => Ok(Status::FailedValidation),
            "FAILED_PORTAL" => Ok(Status::FailedPortal),
            "FAILED_TECH" => Ok(Status::FailedTech),
            _ => Err(Error::Other(format!("unknown status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Last error
// ---------------------------------------------------------------------------

/// The classified error recorded on a failed or retried item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&TaskError> for LastError {
    fn from(err: &TaskError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// What kind of portal interaction a work item asks for.
///
/// One variant per supported workflow; the executor dispatches on the tag to
/// the matching collaborator flow. Fields are opaque to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Eligibility(EligibilityProbe),
    ClaimStatus(ClaimStatusProbe),
}

impl TaskPayload {
    /// Stable tag for routing, metrics, and storage.
    pub fn label(&self) -> &'static str {
        match self {
            TaskPayload::Eligibility(_) => "eligibility",
            TaskPayload::ClaimStatus(_) => "claim_status",
        }
    }

    /// Shape check run before any portal interaction. Failures are
    /// [`TaskError::Validation`] and are never retried.
    pub fn validate(&self) -> std::result::Result<(), TaskError> {
        match self {
            TaskPayload::Eligibility(probe) => probe.validate(),
            TaskPayload::ClaimStatus(probe) => probe.validate(),
        }
    }
}

/// Input for an eligibility / benefits check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityProbe {
    pub payer_name: String,
    /// Patient member ID with the payer.
    pub member_id: String,
    pub patient_last_name: String,
    pub patient_first_name: Option<String>,
    pub date_of_birth: NaiveDate,
    /// Date of service range. `dos_to` of None means a single date.
    pub dos_from: NaiveDate,
    pub dos_to: Option<NaiveDate>,
    /// Service type code (e.g. "30" for plan-level coverage).
    pub service_type_code: Option<String>,
    pub provider_npi: Option<String>,
}

impl EligibilityProbe {
    fn validate(&self) -> std::result::Result<(), TaskError> {
        if self.payer_name.trim().is_empty() {
            return Err(TaskError::Validation("payer_name is required".into()));
        }
        if self.member_id.trim().is_empty() {
            return Err(TaskError::Validation("member_id is required".into()));
        }
        if self.patient_last_name.trim().is_empty() {
            return Err(TaskError::Validation(
                "patient_last_name is required".into(),
            ));
        }
        check_date_range(self.dos_from, self.dos_to)
    }
}

/// Input for a claim status inquiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimStatusProbe {
    pub payer_name: String,
    /// Payer-assigned claim ID. At least one of the two claim IDs must be set.
    pub payer_claim_id: Option<String>,
    pub provider_claim_id: Option<String>,
    pub member_id: Option<String>,
    pub patient_last_name: Option<String>,
    pub patient_first_name: Option<String>,
    pub patient_dob: Option<NaiveDate>,
    pub dos_from: NaiveDate,
    pub dos_to: Option<NaiveDate>,
    pub claim_amount: Option<f64>,
}

impl ClaimStatusProbe {
    fn validate(&self) -> std::result::Result<(), TaskError> {
        if self.payer_name.trim().is_empty() {
            return Err(TaskError::Validation("payer_name is required".into()));
        }
        let has_claim_id = self
            .payer_claim_id
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
            || self
                .provider_claim_id
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty());
        if !has_claim_id {
            return Err(TaskError::Validation(
                "either payer_claim_id or provider_claim_id is required".into(),
            ));
        }
        check_date_range(self.dos_from, self.dos_to)
    }
}

fn check_date_range(from: NaiveDate, to: Option<NaiveDate>) -> std::result::Result<(), TaskError> {
    if let Some(to) = to
        && to < from
    {
        return Err(TaskError::Validation(format!(
            "dos_to {to} precedes dos_from {from}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// The persisted result of a successful work item.
///
/// Written transactionally with the `SUCCESS` flip; exists if and only if the
/// item succeeded. `data` is the result summary, opaque to the engine;
/// `lines` are the ordered itemized sub-results (benefit lines, reason
/// codes), owned exclusively by this outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub data: serde_json::Value,
    pub lines: Vec<OutcomeLine>,
    pub duration_ms: u64,
}

/// One ordered detail line of an outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeLine {
    pub position: u32,
    pub label: String,
    pub data: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for enqueueing new work. The engine's public submission API.
pub struct NewWorkItem {
    pub(crate) payload: TaskPayload,
    pub(crate) idempotency_key: Option<String>,
}

impl NewWorkItem {
    pub fn new(payload: TaskPayload) -> Self {
        Self {
            payload,
            idempotency_key: None,
        }
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_tabled_transitions_are_allowed() {
        use Status::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Success));
        assert!(InProgress.can_transition_to(Pending));
        assert!(InProgress.can_transition_to(FailedTech));

        assert!(!Pending.can_transition_to(Success));
        assert!(!Success.can_transition_to(Pending));
        assert!(!FailedTech.can_transition_to(InProgress));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            Status::Pending,
            Status::InProgress,
            Status::Success,
            Status::FailedValidation,
            Status::FailedPortal,
            Status::FailedTech,
        ] {
            let parsed: Status = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn claim_status_probe_requires_a_claim_id() {
        let probe = ClaimStatusProbe {
            payer_name: "CIGNA HEALTHCARE".into(),
            payer_claim_id: None,
            provider_claim_id: Some("  ".into()),
            member_id: None,
            patient_last_name: None,
            patient_first_name: None,
            patient_dob: None,
            dos_from: NaiveDate::from_ymd_opt(2025, 10, 20).unwrap(),
            dos_to: None,
            claim_amount: None,
        };
        assert!(matches!(
            probe.validate(),
            Err(TaskError::Validation(_))
        ));
    }

    #[test]
    fn inverted_date_range_fails_validation() {
        let probe = EligibilityProbe {
            payer_name: "AETNA".into(),
            member_id: "W1234".into(),
            patient_last_name: "DOE".into(),
            patient_first_name: None,
            date_of_birth: NaiveDate::from_ymd_opt(1987, 6, 15).unwrap(),
            dos_from: NaiveDate::from_ymd_opt(2025, 11, 5).unwrap(),
            dos_to: NaiveDate::from_ymd_opt(2025, 11, 1),
            service_type_code: None,
            provider_npi: None,
        };
        assert!(matches!(
            TaskPayload::Eligibility(probe).validate(),
            Err(TaskError::Validation(_))
        ));
    }
}
