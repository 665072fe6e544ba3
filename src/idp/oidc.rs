//! OIDC token verification: JWT signature validation and JWKS caching.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Resolve the provider's JWKS URI: the configured `jwksUri`, or the
//!    `jwks_uri` advertised by `{issuer}/.well-known/openid-configuration`.
//! 3. Fetch the JWKS (cached for `jwks_cache_ttl`; refreshed on unknown `kid`).
//! 4. Verify the signature and standard claims (`exp`, `nbf`, `iss`).
//! 5. Apply the provider's audience restriction.
//!
//! Unknown `kid` triggers a single cache refresh before failing; a key that
//! truly does not exist is not re-fetched indefinitely. Clock leeway of 60
//! seconds tolerates minor skew between the IdP and the broker host.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::{
    Algorithm, DecodingKey, Header, TokenData, Validation,
    jwk::{AlgorithmParameters, JwkSet},
};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, error, warn};

use super::{IdpError, IdpProvider, TokenClaims, check_audience, require_subject};
use crate::broker::document::ClientIdpConfig;

/// Cached JWKS entry.
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
    ttl: Duration,
}

impl CachedJwks {
    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl
    }
}

/// JWKS cache with one entry per OIDC issuer, shared by every [`OidcProvider`].
pub struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    http: reqwest::Client,
    ttl: Duration,
}

impl JwksCache {
    /// Create a cache with the given entry TTL and outbound request timeout.
    #[must_use]
    pub fn new(ttl: Duration, http_timeout: Duration) -> Self {
        Self {
            inner: DashMap::new(),
            http: http_client(http_timeout),
            ttl,
        }
    }

    /// HTTP client used for JWKS and discovery requests.
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Return the cached JWKS for `issuer`, or fetch from `jwks_uri` if stale.
    ///
    /// If `force_refresh` is `true`, the cache is bypassed regardless of TTL.
    pub async fn get_or_fetch(
        &self,
        issuer: &str,
        jwks_uri: &str,
        force_refresh: bool,
    ) -> Result<JwkSet, IdpError> {
        if !force_refresh {
            if let Some(cached) = self.inner.get(issuer) {
                if !cached.is_stale() {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!(issuer = %issuer, "Fetching JWKS from {jwks_uri}");
        let jwks: JwkSet = self
            .http
            .get(jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        self.inner.insert(
            issuer.to_string(),
            CachedJwks {
                keys: jwks.clone(),
                fetched_at: Instant::now(),
                ttl: self.ttl,
            },
        );

        Ok(jwks)
    }
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), Duration::from_secs(10))
    }
}

/// Outbound client with `timeout` applied to every request.
fn http_client(timeout: Duration) -> reqwest::Client {
    match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            error!(
                error = %e,
                timeout_secs = timeout.as_secs(),
                "Failed to build HTTP client, outbound requests have no timeout"
            );
            reqwest::Client::new()
        }
    }
}

/// Subset of the OIDC discovery document we rely on.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

/// An issuer-bound OIDC identity provider.
pub struct OidcProvider {
    name: String,
    issuer: String,
    audiences: Vec<String>,
    configured_jwks_uri: Option<String>,
    discovered_jwks_uri: OnceCell<String>,
    jwks_cache: Arc<JwksCache>,
}

impl OidcProvider {
    /// Build a provider from its configuration entry.
    #[must_use]
    pub fn new(config: &ClientIdpConfig, jwks_cache: Arc<JwksCache>) -> Self {
        if !config.issuer.starts_with("https://") {
            warn!(idp = %config.name, issuer = %config.issuer, "OIDC issuer is not HTTPS");
        }

        Self {
            name: config.name.clone(),
            issuer: config.issuer.clone(),
            audiences: config.audience.clone(),
            configured_jwks_uri: config.jwks_uri.clone(),
            discovered_jwks_uri: OnceCell::new(),
            jwks_cache,
        }
    }

    /// Issuer URL this provider trusts.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// JWKS URI from configuration, or from OIDC discovery on first use.
    async fn jwks_uri(&self) -> Result<&str, IdpError> {
        if let Some(ref uri) = self.configured_jwks_uri {
            return Ok(uri.as_str());
        }

        let uri = self
            .discovered_jwks_uri
            .get_or_try_init(|| async {
                let url = discovery_url(&self.issuer);
                debug!(idp = %self.name, "Discovering OIDC configuration at {url}");
                let doc: DiscoveryDocument = self
                    .jwks_cache
                    .http()
                    .get(&url)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await
                    .map_err(|e| IdpError::Discovery {
                        issuer: self.issuer.clone(),
                        reason: e.to_string(),
                    })?;
                Ok::<_, IdpError>(doc.jwks_uri)
            })
            .await?;

        Ok(uri.as_str())
    }

    /// Find a decoding key by `kid`, refreshing the JWKS cache if not found.
    async fn find_decoding_key(&self, kid: &str) -> Result<DecodingKey, IdpError> {
        let jwks_uri = self.jwks_uri().await?;

        let jwks = self
            .jwks_cache
            .get_or_fetch(&self.issuer, jwks_uri, false)
            .await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        debug!(kid = %kid, idp = %self.name, "Key not found in cached JWKS, refreshing");
        let jwks = self
            .jwks_cache
            .get_or_fetch(&self.issuer, jwks_uri, true)
            .await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(|| IdpError::UnknownKeyId(kid.to_string()))
    }
}

#[async_trait]
impl IdpProvider for OidcProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate_token(&self, token: &str) -> Result<TokenClaims, IdpError> {
        let header = jsonwebtoken::decode_header(token)?;
        let kid = header.kid.clone().ok_or(IdpError::MissingKeyId)?;

        let decoding_key = self.find_decoding_key(&kid).await?;

        let mut validation = build_validation(&header);
        validation.set_issuer(&[self.issuer.as_str()]);
        // Audience is checked manually below to accept both string and array forms
        validation.validate_aud = false;

        let token_data: TokenData<TokenClaims> =
            jsonwebtoken::decode(token, &decoding_key, &validation)?;
        let claims = token_data.claims;

        if !self.audiences.is_empty() {
            check_audience(&claims.aud, &self.audiences)?;
        }

        require_subject(claims)
    }
}

/// Find a JWK by `kid` in a `JwkSet` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    for jwk in &jwks.keys {
        let jwk_kid = jwk.common.key_id.as_deref().unwrap_or("");
        if jwk_kid != kid {
            continue;
        }

        return match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            AlgorithmParameters::EllipticCurve(ec) => {
                DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
            }
            AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
        };
    }
    None
}

/// Build a [`Validation`] from the JWT header algorithm.
fn build_validation(header: &Header) -> Validation {
    let alg = match header.alg {
        Algorithm::RS256 => Algorithm::RS256,
        Algorithm::RS384 => Algorithm::RS384,
        Algorithm::RS512 => Algorithm::RS512,
        Algorithm::ES256 => Algorithm::ES256,
        Algorithm::ES384 => Algorithm::ES384,
        other => {
            warn!(alg = ?other, "Unsupported JWT algorithm, defaulting to RS256");
            Algorithm::RS256
        }
    };

    let mut v = Validation::new(alg);
    v.leeway = 60;
    v
}

/// OIDC discovery document location for an issuer.
fn discovery_url(issuer: &str) -> String {
    let base = issuer.trim_end_matches('/');
    format!("{base}/.well-known/openid-configuration")
}
