//! Credential backends.
//!
//! An [`AccessProvider`] turns an authorized mint request into concrete,
//! short-lived credentials. Backends are declared in configuration documents
//! under `accessProviders` and referenced by name from key bindings.

pub mod mock;
pub mod sts;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use mock::MockAccessProvider;
pub use sts::StsAccessProvider;

use crate::Result;
use crate::broker::document::{AccessProviderConfig, AccessProviderKind};

/// Everything a backend needs to mint one key.
#[derive(Debug, Clone)]
pub struct AccessRequest<'a> {
    /// Key being minted
    pub key_name: &'a str,
    /// Subject the credentials are minted for
    pub subject: &'a str,
    /// Token presented to the backend (broker token or caller token)
    pub web_identity_token: &'a str,
    /// Requested credential lifetime
    pub duration: Duration,
    /// Role to assume, when the key or provider sets one
    pub role_arn: Option<&'a str>,
    /// Session name recorded by the backend
    pub session_name: String,
}

/// Raw credentials returned by a backend, before output mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCredentials {
    /// Backend field name → value
    pub fields: BTreeMap<String, String>,
    /// When the credentials stop working
    pub expires_at: DateTime<Utc>,
}

/// A credential backend.
#[async_trait]
pub trait AccessProvider: Send + Sync + 'static {
    /// Provider name as declared in configuration.
    fn name(&self) -> &str;

    /// Mint credentials for one key.
    async fn mint(&self, request: &AccessRequest<'_>) -> Result<IssuedCredentials>;
}

/// Instantiate a backend from its configuration entry.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidDocument`] when required settings are
/// missing or malformed.
pub fn build_access_provider(
    config: &AccessProviderConfig,
    http: &reqwest::Client,
) -> Result<Arc<dyn AccessProvider>> {
    Ok(match config.kind {
        AccessProviderKind::Minio | AccessProviderKind::AwsSts => {
            Arc::new(StsAccessProvider::from_config(config, http.clone())?)
        }
        AccessProviderKind::Mock => Arc::new(MockAccessProvider::new(&config.name)),
    })
}

/// Session name derived from the subject, restricted to the characters STS
/// accepts (`[\w+=,.@-]`, at most 64).
#[must_use]
pub fn session_name(subject: &str) -> String {
    let cleaned: String = subject
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "_+=,.@-".contains(c) {
                c
            } else {
                '-'
            }
        })
        .take(64)
        .collect();

    if cleaned.len() < 2 {
        format!("voidkey-{cleaned}")
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_config(kind: AccessProviderKind, endpoint: Option<&str>) -> AccessProviderConfig {
        AccessProviderConfig {
            name: "backend".to_string(),
            kind,
            endpoint: endpoint.map(str::to_string),
            region: None,
            role_arn: None,
        }
    }

    #[test]
    fn session_name_replaces_invalid_characters() {
        assert_eq!(session_name("user:alice"), "user-alice");
        assert_eq!(session_name("repo:org/app:ref"), "repo-org-app-ref");
    }

    #[test]
    fn session_name_is_bounded() {
        let long = "a".repeat(200);
        assert_eq!(session_name(&long).len(), 64);
        assert_eq!(session_name("x"), "voidkey-x");
    }

    #[test]
    fn builds_mock_provider() {
        let provider = build_access_provider(
            &provider_config(AccessProviderKind::Mock, None),
            &reqwest::Client::new(),
        )
        .unwrap();

        assert_eq!(provider.name(), "backend");
    }

    #[test]
    fn minio_without_endpoint_is_rejected() {
        let result = build_access_provider(
            &provider_config(AccessProviderKind::Minio, None),
            &reqwest::Client::new(),
        );

        assert!(result.is_err());
    }
}
