//! Audit logging for credential lifecycle events.
//!
//! Every event is emitted via `tracing::info!` with a JSON payload in the
//! `audit` field, making the trail queryable by any log aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `credential.minted` | A backend issued credentials for a key |
//! | `credential.denied` | The subject is not authorized for the key |
//! | `credential.failed` | Token validation or the backend call failed |

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Structured audit event.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"credential.minted"`).
    pub event: &'static str,
    /// Token subject, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Requested key.
    pub key_name: String,
    /// Identity provider that validated the token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idp: Option<String>,
    /// Access provider that minted (or was to mint) the credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Credential expiry (for `credential.minted`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Human-readable reason for denial or failure events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    /// Construct a `credential.minted` event.
    #[must_use]
    pub fn minted(
        subject: &str,
        key_name: &str,
        idp: &str,
        provider: &str,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event: "credential.minted",
            subject: Some(subject.to_string()),
            key_name: key_name.to_string(),
            idp: Some(idp.to_string()),
            provider: Some(provider.to_string()),
            expires_at: Some(expires_at),
            reason: None,
        }
    }

    /// Construct a `credential.denied` event.
    #[must_use]
    pub fn denied(subject: &str, key_name: &str, idp: &str) -> Self {
        Self {
            event: "credential.denied",
            subject: Some(subject.to_string()),
            key_name: key_name.to_string(),
            idp: Some(idp.to_string()),
            provider: None,
            expires_at: None,
            reason: Some("no identity binding for key".to_string()),
        }
    }

    /// Construct a `credential.failed` event.
    #[must_use]
    pub fn failed(
        subject: Option<&str>,
        key_name: &str,
        provider: Option<&str>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            event: "credential.failed",
            subject: subject.map(str::to_string),
            key_name: key_name.to_string(),
            idp: None,
            provider: provider.map(str::to_string),
            expires_at: None,
            reason: Some(reason.into()),
        }
    }
}

/// Emit an audit event via `tracing::info!` with structured fields.
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "credential audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
