//! The built-in `hello-world` identity provider.
//!
//! Verifies HS256 tokens signed with a shared secret from the application
//! configuration. It keeps a zero-configuration broker usable: the provider
//! is always registered, is the default until a client IdP claims that role,
//! and is the target of the identity resolver's one-shot fallback.
//!
//! Without a configured secret the provider keys itself with random bytes
//! drawn at startup, so tokens can only come from the same process.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::json;
use uuid::Uuid;

use super::{HELLO_WORLD_PROVIDER, IdpError, IdpProvider, TokenClaims, require_subject};
use crate::config::HelloWorldConfig;

/// Shared-secret development provider.
pub struct HelloWorldProvider {
    issuer: String,
    audience: Option<String>,
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    ephemeral: bool,
}

impl HelloWorldProvider {
    /// Build the provider from its configuration section.
    #[must_use]
    pub fn new(config: &HelloWorldConfig) -> Self {
        let (secret, ephemeral) = match config.secret {
            Some(ref secret) if !secret.is_empty() => (secret.as_bytes().to_vec(), false),
            _ => (random_secret(), true),
        };

        Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            decoding_key: DecodingKey::from_secret(&secret),
            encoding_key: EncodingKey::from_secret(&secret),
            ephemeral,
        }
    }

    /// Whether the signing secret was generated for this process only.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Sign a development token for `subject`, valid for `ttl`.
    pub fn sign(&self, subject: &str, ttl: Duration) -> Result<String, IdpError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();

        let mut claims = json!({
            "sub": subject,
            "iss": self.issuer,
            "iat": now,
            "exp": now.saturating_add(ttl.as_secs()),
        });
        if let Some(ref aud) = self.audience {
            claims["aud"] = json!(aud);
        }

        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }
}

#[async_trait]
impl IdpProvider for HelloWorldProvider {
    fn name(&self) -> &str {
        HELLO_WORLD_PROVIDER
    }

    async fn validate_token(&self, token: &str) -> Result<TokenClaims, IdpError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        match self.audience {
            Some(ref aud) => validation.set_audience(&[aud.as_str()]),
            None => validation.validate_aud = false,
        }

        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding_key, &validation)?;
        require_subject(data.claims)
    }
}

fn random_secret() -> Vec<u8> {
    let mut secret = Vec::with_capacity(64);
    for _ in 0..4 {
        secret.extend_from_slice(Uuid::new_v4().as_bytes());
    }
    secret
}
