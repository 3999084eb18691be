//! HTTP bridge to the browser-automation sidecar.
//!
//! The sidecar owns the actual browser: it logs in, fills forms, parses
//! result pages, and reports back over a small JSON API. This bridge maps
//! that API onto the [`Portal`] trait, including the translation of sidecar
//! error envelopes into the closed error taxonomy.
//!
//! Sidecar API:
//! - `POST /session` with credentials → `{ "session_id": ... }`
//! - `GET  /session/{id}/health` → 200 while the portal login is live
//! - `POST /session/{id}/perform` with a payload → a report, or an error
//!   envelope `{ "kind": ..., "message": ... }`; 409 means the portal
//!   session expired out from under the sidecar
//! - `GET  /session/{id}/screenshot`, `GET /session/{id}/page` → raw bytes

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifacts::{ArtifactBlob, ArtifactKind};
use crate::error::TaskError;
use crate::model::TaskPayload;

use super::{Portal, PortalReport};

/// Portal login credentials forwarded to the sidecar.
pub struct BridgeCredentials {
    pub username: String,
    pub password: SecretString,
}

/// [`Portal`] implementation backed by the sidecar's HTTP API.
pub struct BridgePortal {
    http: Client,
    base_url: String,
    credentials: BridgeCredentials,
}

/// A sidecar-held automation session.
#[derive(Debug, Clone)]
pub struct BridgeSession {
    pub id: String,
}

#[derive(Serialize)]
struct OpenSessionRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct OpenSessionResponse {
    session_id: String,
}

/// Classified error envelope returned by the sidecar on failures.
#[derive(Deserialize)]
struct ErrorEnvelope {
    kind: String,
    message: String,
}

impl ErrorEnvelope {
    fn into_task_error(self) -> TaskError {
        match self.kind.as_str() {
            "validation" => TaskError::Validation(self.message),
            "portal_business" => TaskError::PortalBusiness(self.message),
            "portal_changed" => TaskError::PortalChanged(self.message),
            "transient" => TaskError::Transient(self.message),
            "session_expired" => TaskError::SessionExpired(self.message),
            other => TaskError::Unknown(format!("{other}: {}", self.message)),
        }
    }
}

impl BridgePortal {
    pub fn new(base_url: impl Into<String>, credentials: BridgeCredentials) -> Result<Self, TaskError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            // Portal flows are slow: results pages can take minutes to settle.
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| TaskError::Unknown(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Read the error envelope off a non-success response; anything
    /// unparseable becomes `Unknown`.
    async fn error_from_response(response: reqwest::Response) -> TaskError {
        let status = response.status();
        match response.json::<ErrorEnvelope>().await {
            Ok(envelope) => envelope.into_task_error(),
            Err(_) => TaskError::Unknown(format!("sidecar returned HTTP {status}")),
        }
    }

    async fn fetch_artifact(
        &self,
        session: &BridgeSession,
        path: &str,
        kind: ArtifactKind,
    ) -> Option<ArtifactBlob> {
        let url = self.url(&format!("/session/{}/{path}", session.id));
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => match response.bytes().await {
                Ok(bytes) => Some(ArtifactBlob {
                    kind,
                    bytes: bytes.to_vec(),
                }),
                Err(e) => {
                    debug!(kind = %kind, "artifact body read failed: {e}");
                    None
                }
            },
            Ok(response) => {
                debug!(kind = %kind, status = %response.status(), "artifact not available");
                None
            }
            Err(e) => {
                debug!(kind = %kind, "artifact request failed: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl Portal for BridgePortal {
    type Session = BridgeSession;

    async fn open_session(&self) -> Result<BridgeSession, TaskError> {
        let response = self
            .http
            .post(self.url("/session"))
            .json(&OpenSessionRequest {
                username: &self.credentials.username,
                password: self.credentials.password.expose_secret(),
            })
            .send()
            .await
            .map_err(|e| TaskError::Transient(format!("sidecar unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: OpenSessionResponse = response
            .json()
            .await
            .map_err(|e| TaskError::Unknown(format!("malformed session reply: {e}")))?;

        debug!(session_id = %body.session_id, "sidecar session opened");
        Ok(BridgeSession {
            id: body.session_id,
        })
    }

    async fn check_session(&self, session: &BridgeSession) -> bool {
        let url = self.url(&format!("/session/{}/health", session.id));
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn perform(
        &self,
        session: &BridgeSession,
        payload: &TaskPayload,
    ) -> Result<PortalReport, TaskError> {
        let url = self.url(&format!("/session/{}/perform", session.id));
        let response = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TaskError::Transient(format!("sidecar perform timed out: {e}"))
                } else {
                    TaskError::Transient(format!("sidecar unreachable: {e}"))
                }
            })?;

        match response.status() {
            status if status.is_success() => response
                .json::<PortalReport>()
                .await
                .map_err(|e| TaskError::Unknown(format!("malformed report from sidecar: {e}"))),
            StatusCode::CONFLICT => Err(TaskError::SessionExpired(
                "sidecar reports the portal session is no longer authenticated".into(),
            )),
            _ => Err(Self::error_from_response(response).await),
        }
    }

    async fn capture_artifacts(
        &self,
        session: &BridgeSession,
    ) -> Result<Vec<ArtifactBlob>, TaskError> {
        let mut blobs = Vec::new();
        if let Some(blob) = self
            .fetch_artifact(session, "screenshot", ArtifactKind::Screenshot)
            .await
        {
            blobs.push(blob);
        }
        if let Some(blob) = self
            .fetch_artifact(session, "page", ArtifactKind::PageSource)
            .await
        {
            blobs.push(blob);
        }
        Ok(blobs)
    }
}
