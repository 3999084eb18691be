//! Shared test support: payload builders and a scripted portal double.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use portalq::artifacts::{ArtifactBlob, ArtifactKind};
use portalq::error::TaskError;
use portalq::model::{ClaimStatusProbe, EligibilityProbe, TaskPayload};
use portalq::portal::{BenefitLine, EligibilityReport, Portal, PortalReport};

pub fn eligibility_payload(member_id: &str) -> TaskPayload {
    TaskPayload::Eligibility(EligibilityProbe {
        payer_name: "CIGNA HEALTHCARE".into(),
        member_id: member_id.into(),
        patient_last_name: "DOE".into(),
        patient_first_name: Some("JOHN".into()),
        date_of_birth: NaiveDate::from_ymd_opt(1987, 6, 15).unwrap(),
        dos_from: NaiveDate::from_ymd_opt(2025, 11, 5).unwrap(),
        dos_to: None,
        service_type_code: Some("30".into()),
        provider_npi: None,
    })
}

/// A payload that fails shape validation (member_id empty).
pub fn invalid_payload() -> TaskPayload {
    TaskPayload::Eligibility(EligibilityProbe {
        payer_name: "CIGNA HEALTHCARE".into(),
        member_id: "".into(),
        patient_last_name: "DOE".into(),
        patient_first_name: None,
        date_of_birth: NaiveDate::from_ymd_opt(1987, 6, 15).unwrap(),
        dos_from: NaiveDate::from_ymd_opt(2025, 11, 5).unwrap(),
        dos_to: None,
        service_type_code: None,
        provider_npi: None,
    })
}

pub fn claim_status_payload(claim_id: &str) -> TaskPayload {
    TaskPayload::ClaimStatus(ClaimStatusProbe {
        payer_name: "AETNA".into(),
        payer_claim_id: Some(claim_id.into()),
        provider_claim_id: None,
        member_id: Some("XY654".into()),
        patient_last_name: Some("DOE".into()),
        patient_first_name: None,
        patient_dob: None,
        dos_from: NaiveDate::from_ymd_opt(2025, 10, 20).unwrap(),
        dos_to: None,
        claim_amount: Some(125.0),
    })
}

pub fn sample_report() -> PortalReport {
    PortalReport::Eligibility(EligibilityReport {
        coverage_status: Some("Active".into()),
        plan_name: Some("OPEN ACCESS PLUS".into()),
        plan_type: Some("PPO".into()),
        coverage_start_date: NaiveDate::from_ymd_opt(2025, 1, 1),
        coverage_end_date: NaiveDate::from_ymd_opt(2025, 12, 31),
        deductible_individual: Some(1500.0),
        deductible_remaining_individual: Some(800.0),
        oop_max_individual: Some(5000.0),
        oop_max_family: Some(10000.0),
        benefit_lines: vec![
            BenefitLine {
                benefit_category: "Primary Care Office Visit".into(),
                service_type_code: Some("30".into()),
                network_tier: Some("In-Network".into()),
                copay_amount: Some(25.0),
                coinsurance_percent: None,
                deductible_amount: None,
                notes: None,
            },
            BenefitLine {
                benefit_category: "Specialist Visit".into(),
                service_type_code: Some("30".into()),
                network_tier: Some("In-Network".into()),
                copay_amount: Some(50.0),
                coinsurance_percent: None,
                deductible_amount: None,
                notes: None,
            },
        ],
    })
}

/// Artifact sink double that records what was stored.
#[derive(Default)]
pub struct MemorySink {
    pub stored: Mutex<Vec<(portalq::model::WorkItemId, ArtifactKind)>>,
}

#[async_trait]
impl portalq::artifacts::ArtifactSink for MemorySink {
    async fn store(
        &self,
        id: portalq::model::WorkItemId,
        _captured_at: chrono::DateTime<chrono::Utc>,
        blob: ArtifactBlob,
    ) -> portalq::error::Result<portalq::artifacts::ArtifactRef> {
        self.stored.lock().unwrap().push((id, blob.kind));
        Ok(portalq::artifacts::ArtifactRef {
            location: format!("mem://{id}"),
        })
    }
}

/// What the scripted portal should do on one `perform` call.
pub enum Step {
    Succeed,
    Fail(TaskError),
}

/// Portal double driven by a queue of scripted steps. Calls beyond the
/// script succeed.
pub struct ScriptedPortal {
    steps: Mutex<VecDeque<Step>>,
    pub opens: AtomicU32,
    pub performs: AtomicU32,
    pub captures: AtomicU32,
    /// `open_session` fails this many times before succeeding.
    pub failing_opens: AtomicU32,
    /// Answer the liveness probe gives for cached sessions.
    pub session_live: AtomicBool,
}

impl ScriptedPortal {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            opens: AtomicU32::new(0),
            performs: AtomicU32::new(0),
            captures: AtomicU32::new(0),
            failing_opens: AtomicU32::new(0),
            session_live: AtomicBool::new(true),
        }
    }

    pub fn always_succeeding() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl Portal for ScriptedPortal {
    type Session = u32;

    async fn open_session(&self) -> Result<u32, TaskError> {
        if self.failing_opens.load(Ordering::SeqCst) > 0 {
            self.failing_opens.fetch_sub(1, Ordering::SeqCst);
            return Err(TaskError::Transient("login timed out".into()));
        }
        Ok(self.opens.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn check_session(&self, _session: &u32) -> bool {
        self.session_live.load(Ordering::SeqCst)
    }

    async fn perform(
        &self,
        _session: &u32,
        _payload: &TaskPayload,
    ) -> Result<PortalReport, TaskError> {
        self.performs.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Succeed) | None => Ok(sample_report()),
        }
    }

    async fn capture_artifacts(&self, _session: &u32) -> Result<Vec<ArtifactBlob>, TaskError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(vec![ArtifactBlob {
            kind: ArtifactKind::PageSource,
            bytes: b"<html>error page</html>".to_vec(),
        }])
    }
}
