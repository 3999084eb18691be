//! The portal-interaction collaborator.
//!
//! The engine never drives a browser itself. It talks to an implementation of
//! [`Portal`]: given a live session and a payload, perform the matching
//! workflow at the portal and come back with a typed report or a classified
//! error. The production implementation is [`bridge::BridgePortal`], which
//! delegates to the browser-automation sidecar over HTTP.

pub mod bridge;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactBlob;
use crate::error::TaskError;
use crate::model::{Outcome, OutcomeLine, TaskPayload};

/// A portal automation backend.
///
/// Implementations must be safe to call once per attempt and must keep no
/// per-task state outside the session handle. `perform` is polymorphic over
/// the payload's workflow tag.
#[async_trait]
pub trait Portal: Send + Sync + 'static {
    /// The live automation session. Expensive to create (authentication),
    /// cheap to reuse.
    type Session: Send + Sync;

    /// Log in and produce a fresh session.
    async fn open_session(&self) -> Result<Self::Session, TaskError>;

    /// Cheap liveness probe: is the session still authenticated?
    async fn check_session(&self, session: &Self::Session) -> bool;

    /// Run the workflow the payload asks for.
    async fn perform(
        &self,
        session: &Self::Session,
        payload: &TaskPayload,
    ) -> Result<PortalReport, TaskError>;

    /// Capture whatever diagnostic evidence is available right now.
    async fn capture_artifacts(
        &self,
        session: &Self::Session,
    ) -> Result<Vec<ArtifactBlob>, TaskError>;
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Structured result of a performed workflow, one variant per payload kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PortalReport {
    Eligibility(EligibilityReport),
    ClaimStatus(ClaimStatusReport),
}

/// Parsed eligibility / benefits answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityReport {
    pub coverage_status: Option<String>,
    pub plan_name: Option<String>,
    pub plan_type: Option<String>,
    pub coverage_start_date: Option<NaiveDate>,
    pub coverage_end_date: Option<NaiveDate>,
    pub deductible_individual: Option<f64>,
    pub deductible_remaining_individual: Option<f64>,
    pub oop_max_individual: Option<f64>,
    pub oop_max_family: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub benefit_lines: Vec<BenefitLine>,
}

/// One itemized benefit from an eligibility answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenefitLine {
    pub benefit_category: String,
    pub service_type_code: Option<String>,
    pub network_tier: Option<String>,
    pub copay_amount: Option<f64>,
    pub coinsurance_percent: Option<f64>,
    pub deductible_amount: Option<f64>,
    pub notes: Option<String>,
}

/// Parsed claim status answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimStatusReport {
    pub transaction_id: Option<String>,
    pub high_level_status: Option<String>,
    pub status_code: Option<String>,
    pub finalized_date: Option<NaiveDate>,
    pub claim_number: Option<String>,
    pub billed_amount: Option<f64>,
    pub paid_amount: Option<f64>,
    pub check_or_eft_number: Option<String>,
    pub payment_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reason_codes: Vec<ReasonCode>,
}

/// One adjudication reason code from a claim status answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonCode {
    pub code_type: String,
    pub code: String,
    pub description: Option<String>,
}

impl PortalReport {
    /// Flatten the typed report into the store's outcome shape: the header
    /// becomes the summary payload, the itemized entries become ordered
    /// detail lines.
    pub fn into_outcome(self, duration_ms: u64) -> Outcome {
        let (data, lines) = match self {
            PortalReport::Eligibility(mut report) => {
                let lines = std::mem::take(&mut report.benefit_lines)
                    .into_iter()
                    .enumerate()
                    .map(|(i, line)| OutcomeLine {
                        position: i as u32,
                        label: line.benefit_category.clone(),
                        data: serde_json::to_value(&line).unwrap_or(serde_json::Value::Null),
                    })
                    .collect();
                (
                    serde_json::to_value(&report).unwrap_or(serde_json::Value::Null),
                    lines,
                )
            }
            PortalReport::ClaimStatus(mut report) => {
                let lines = std::mem::take(&mut report.reason_codes)
                    .into_iter()
                    .enumerate()
                    .map(|(i, code)| OutcomeLine {
                        position: i as u32,
                        label: format!("{}:{}", code.code_type, code.code),
                        data: serde_json::to_value(&code).unwrap_or(serde_json::Value::Null),
                    })
                    .collect();
                (
                    serde_json::to_value(&report).unwrap_or(serde_json::Value::Null),
                    lines,
                )
            }
        };

        Outcome {
            data,
            lines,
            duration_ms,
        }
    }
}
