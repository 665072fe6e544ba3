//! Identity providers: turn a bearer token into verified claims.
//!
//! Every provider registered with the broker implements [`IdpProvider`].
//! Two implementations ship with the crate:
//!
//! - [`OidcProvider`]: an issuer-bound OIDC verifier backed by a shared
//!   [`JwksCache`].
//! - [`HelloWorldProvider`]: the zero-configuration development provider,
//!   always registered under [`HELLO_WORLD_PROVIDER`].

pub mod hello_world;
pub mod oidc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use hello_world::HelloWorldProvider;
pub use oidc::{JwksCache, OidcProvider};

/// Name of the built-in development provider and the default fallback.
pub const HELLO_WORLD_PROVIDER: &str = "hello-world";

/// Error variants for token validation failures.
#[derive(Debug, thiserror::Error)]
pub enum IdpError {
    /// JWT decode / signature / standard-claim verification failed.
    #[error("JWT verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The JWT header contains no `kid` field.
    #[error("JWT missing 'kid' field in header")]
    MissingKeyId,

    /// The `kid` in the JWT header is not in the provider's JWKS.
    #[error("Unknown key ID: {0}")]
    UnknownKeyId(String),

    /// The token carries an empty `sub` claim.
    #[error("Token has no subject")]
    MissingSubject,

    /// OIDC discovery document could not be used.
    #[error("OIDC discovery failed for {issuer}: {reason}")]
    Discovery {
        /// Issuer URL that was queried.
        issuer: String,
        /// What went wrong.
        reason: String,
    },

    /// Network or HTTP error while fetching discovery or JWKS documents.
    #[error("JWKS fetch error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Claims extracted from a validated token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Audience (single string or array)
    #[serde(default)]
    pub aud: serde_json::Value,
    /// Expiry (Unix timestamp), validated by `jsonwebtoken`
    pub exp: u64,
    /// Issued-at (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Any other claims the issuer included
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A named validator of bearer tokens.
///
/// Implementations must be `Send + Sync` because providers are shared by
/// all request handlers.
#[async_trait]
pub trait IdpProvider: Send + Sync + 'static {
    /// Registered provider name.
    fn name(&self) -> &str;

    /// Verify `token` and return its claims.
    async fn validate_token(&self, token: &str) -> Result<TokenClaims, IdpError>;
}

/// Validate that the token's `aud` claim contains one of the expected audiences.
pub(crate) fn check_audience(
    aud_claim: &serde_json::Value,
    expected: &[String],
) -> Result<(), IdpError> {
    let matches = match aud_claim {
        serde_json::Value::String(s) => expected.iter().any(|e| e == s),
        serde_json::Value::Array(arr) => arr
            .iter()
            .any(|v| v.as_str().is_some_and(|s| expected.iter().any(|e| e == s))),
        _ => false,
    };

    if matches {
        Ok(())
    } else {
        Err(IdpError::Jwt(jsonwebtoken::errors::Error::from(
            jsonwebtoken::errors::ErrorKind::InvalidAudience,
        )))
    }
}

/// Reject claims whose subject is empty.
pub(crate) fn require_subject(claims: TokenClaims) -> Result<TokenClaims, IdpError> {
    if claims.sub.is_empty() {
        Err(IdpError::MissingSubject)
    } else {
        Ok(claims)
    }
}
