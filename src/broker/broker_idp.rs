//! The broker's own identity (OAuth2 client-credentials grant).
//!
//! When a `brokerIdp` is configured, credential backends receive a token
//! issued to the broker rather than the caller's token. The token is cached
//! until shortly before it expires.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use super::document::BrokerIdpConfig;
use crate::Result;

/// Refresh this long before the broker token actually expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Client-credentials token source for the broker identity.
pub struct BrokerIdentity {
    config: BrokerIdpConfig,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl BrokerIdentity {
    /// Create from configuration and a shared HTTP client.
    #[must_use]
    pub fn new(config: BrokerIdpConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            cached: Mutex::new(None),
        }
    }

    /// Configured broker IdP name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Return a valid broker token, requesting a new one when needed.
    pub async fn token(&self) -> Result<String> {
        let cached = self
            .cached
            .lock()
            .clone()
            .filter(|t| Instant::now() < t.refresh_at);
        if let Some(token) = cached {
            return Ok(token.value);
        }

        debug!(idp = %self.config.name, "Requesting broker token");
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        if let Some(ref audience) = self.config.audience {
            form.push(("audience", audience.as_str()));
        }

        let response: TokenResponse = self
            .http
            .post(&self.config.token_endpoint)
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(60));
        let refresh_at = Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN);
        *self.cached.lock() = Some(CachedToken {
            value: response.access_token.clone(),
            refresh_at,
        });

        Ok(response.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BrokerIdpConfig {
        BrokerIdpConfig {
            name: "keycloak-broker".to_string(),
            issuer: "https://auth.example.com/realms/broker".to_string(),
            token_endpoint: "http://127.0.0.1:9/token".to_string(),
            client_id: "voidkey-broker".to_string(),
            client_secret: "secret".to_string(),
            audience: None,
        }
    }

    #[tokio::test]
    async fn fresh_cached_token_is_reused_without_network() {
        // GIVEN: a cached token far from expiry and an unreachable endpoint
        let identity = BrokerIdentity::new(config(), reqwest::Client::new());
        *identity.cached.lock() = Some(CachedToken {
            value: "cached-broker-token".to_string(),
            refresh_at: Instant::now() + Duration::from_secs(600),
        });

        // WHEN: a token is requested
        let token = identity.token().await.unwrap();

        // THEN: the cached value is returned
        assert_eq!(token, "cached-broker-token");
    }

    #[tokio::test]
    async fn stale_token_triggers_a_request() {
        // GIVEN: an expired cache entry and an endpoint nothing listens on
        let identity = BrokerIdentity::new(config(), reqwest::Client::new());
        *identity.cached.lock() = Some(CachedToken {
            value: "stale".to_string(),
            refresh_at: Instant::now(),
        });

        // THEN: the refresh is attempted and its failure surfaces
        assert!(identity.token().await.is_err());
    }

    #[test]
    fn token_response_without_expiry_parses() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","token_type":"Bearer"}"#).unwrap();

        assert_eq!(response.access_token, "abc");
        assert!(response.expires_in.is_none());
    }
}
