//! Synthetic credentials for development and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::{AccessProvider, AccessRequest, IssuedCredentials};
use crate::{Error, Result};

/// Issues random, non-functional credentials in the STS field layout.
#[derive(Debug, Clone)]
pub struct MockAccessProvider {
    name: String,
}

impl MockAccessProvider {
    /// Create a mock backend registered under `name`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl AccessProvider for MockAccessProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn mint(&self, request: &AccessRequest<'_>) -> Result<IssuedCredentials> {
        let expires_at = chrono::Duration::from_std(request.duration)
            .ok()
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                Error::mint(
                    &self.name,
                    format!("duration of {}s is out of range", request.duration.as_secs()),
                )
            })?;

        let access_key: String = Uuid::new_v4()
            .simple()
            .to_string()
            .to_uppercase()
            .chars()
            .take(20)
            .collect();
        let secret = STANDARD.encode(Uuid::new_v4().as_bytes());
        let session = STANDARD.encode(format!(
            "{}:{}:{}",
            request.session_name,
            request.key_name,
            Uuid::new_v4()
        ));
        debug!(
            provider = %self.name,
            key = %request.key_name,
            subject = %request.subject,
            "Issued mock credentials"
        );

        let mut fields = BTreeMap::new();
        fields.insert("AccessKeyId".to_string(), format!("MOCK{access_key}"));
        fields.insert("SecretAccessKey".to_string(), secret);
        fields.insert("SessionToken".to_string(), session);
        fields.insert("Expiration".to_string(), expires_at.to_rfc3339());

        Ok(IssuedCredentials { fields, expires_at })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn request(duration: Duration) -> AccessRequest<'static> {
        AccessRequest {
            key_name: "MINIO_CREDENTIALS",
            subject: "user:alice",
            web_identity_token: "token",
            duration,
            role_arn: None,
            session_name: "user-alice".to_string(),
        }
    }

    #[tokio::test]
    async fn mints_sts_shaped_credentials() {
        let provider = MockAccessProvider::new("mock");

        let issued = provider.mint(&request(Duration::from_secs(900))).await.unwrap();

        assert!(issued.fields["AccessKeyId"].starts_with("MOCK"));
        assert_eq!(issued.fields["AccessKeyId"].len(), 24);
        assert!(issued.fields.contains_key("SecretAccessKey"));
        assert!(issued.fields.contains_key("SessionToken"));
        let remaining = issued.expires_at - Utc::now();
        assert!(remaining.num_seconds() > 890 && remaining.num_seconds() <= 900);
    }

    #[tokio::test]
    async fn every_mint_is_unique() {
        let provider = MockAccessProvider::new("mock");

        let first = provider.mint(&request(Duration::from_secs(60))).await.unwrap();
        let second = provider.mint(&request(Duration::from_secs(60))).await.unwrap();

        assert_ne!(first.fields["AccessKeyId"], second.fields["AccessKeyId"]);
    }

    #[tokio::test]
    async fn out_of_range_duration_is_an_error() {
        // GIVEN: lifetimes past the last representable timestamp
        let provider = MockAccessProvider::new("mock");

        for secs in [10_000_000_000_000, u64::MAX] {
            // WHEN: minting
            let result = provider.mint(&request(Duration::from_secs(secs))).await;

            // THEN: a minting error, not a panic
            assert!(matches!(result, Err(Error::Mint { ref provider, .. }) if provider == "mock"));
        }
    }
}
