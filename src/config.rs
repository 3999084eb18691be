//! Typed configuration.
//!
//! Environment variables carry the deployment-specific values (connection
//! strings, credentials) and are loaded once at startup, failing fast when a
//! required one is missing. Sensitive values are wrapped in
//! `secrecy::SecretString` to keep them out of logs. Behavioral tunables
//! (retry schedule, dispatcher cadence, session retries) come from an
//! optional TOML file so operators can adjust them without rebuilding.

use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;

use crate::dispatcher::DispatcherConfig;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::session::SessionConfig;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Base URL of the browser-automation sidecar.
    pub bridge_url: String,
    pub portal_username: String,
    pub portal_password: SecretString,
    pub artifacts_dir: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            bridge_url: required_var("BRIDGE_URL")?,
            portal_username: required_var("PORTAL_USERNAME")?,
            portal_password: SecretString::from(required_var("PORTAL_PASSWORD")?),
            artifacts_dir: std::env::var("ARTIFACTS_DIR")
                .unwrap_or_else(|_| "artifacts".to_string()),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Behavioral tunables, all defaulted; any subset may appear in the file.
///
/// ```toml
/// [retry]
/// max_retries = 2
/// base_delay_secs = 2
///
/// [dispatcher]
/// poll_interval_secs = 5
///
/// [session]
/// creation_retries = 2
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub retry: RetryPolicy,
    pub dispatcher: DispatcherConfig,
    pub session: SessionConfig,
}

impl Tuning {
    /// Load tunables from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read tuning file {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad tuning file {}: {e}", path.display())))
    }
}
