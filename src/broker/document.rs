//! Configuration documents discovered on disk.
//!
//! A document may contain any combination of:
//!
//! ```yaml
//! clientIdps:
//!   - name: keycloak-client
//!     issuer: https://auth.example.com/realms/client
//!     audience: voidkey            # string or list
//!     jwksUri: https://...         # optional, discovered when absent
//!     isDefault: true              # optional
//! brokerIdp:
//!   name: keycloak-broker
//!   issuer: https://auth.example.com/realms/broker
//!   tokenEndpoint: https://auth.example.com/realms/broker/protocol/openid-connect/token
//!   clientId: voidkey-broker
//!   clientSecret: ${BROKER_CLIENT_SECRET}
//! clientIdentities:
//!   - subject: user:alice
//!     idp: keycloak-client         # optional
//!     keys:
//!       MINIO_CREDENTIALS:
//!         provider: minio-local
//!         duration: 3600
//!         outputs:
//!           AccessKeyId: MINIO_ACCESS_KEY_ID
//! accessProviders:
//!   - name: minio-local
//!     type: minio
//!     endpoint: http://localhost:9000
//! ```
//!
//! Only `clientIdps`, `brokerIdp` and `clientIdentities` make a file eligible
//! for loading; `accessProviders` rides along with them.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Deserializer, de::Error as _};

use crate::config::expand_env_references;
use crate::{Error, Result};

/// Top-level keys that mark a YAML file as broker configuration.
pub const RECOGNIZED_KEYS: [&str; 3] = ["clientIdps", "brokerIdp", "clientIdentities"];

/// Whether a parsed YAML value carries at least one recognized top-level key.
#[must_use]
pub fn has_recognized_configuration(value: &serde_yaml::Value) -> bool {
    let Some(mapping) = value.as_mapping() else {
        return false;
    };
    RECOGNIZED_KEYS
        .iter()
        .any(|key| mapping.get(*key).is_some_and(|v| !v.is_null()))
}

/// One configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    /// Identity providers trusted for client tokens
    #[serde(default)]
    pub client_idps: Vec<ClientIdpConfig>,
    /// The broker's own identity
    #[serde(default)]
    pub broker_idp: Option<BrokerIdpConfig>,
    /// Subjects and the keys they may mint
    #[serde(default)]
    pub client_identities: Vec<ClientIdentityConfig>,
    /// Credential backends
    #[serde(default)]
    pub access_providers: Vec<AccessProviderConfig>,
}

/// A client identity provider entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdpConfig {
    /// Provider name, unique across the broker
    pub name: String,
    /// Expected `iss` claim
    pub issuer: String,
    /// Accepted audiences (empty = not checked)
    #[serde(default, deserialize_with = "one_or_many")]
    pub audience: Vec<String>,
    /// Explicit JWKS location
    #[serde(default)]
    pub jwks_uri: Option<String>,
    /// Make this the provider used when a request names none
    #[serde(default, alias = "default")]
    pub is_default: bool,
}

/// The broker's own identity, used to authenticate to credential backends.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerIdpConfig {
    /// Provider name
    pub name: String,
    /// Issuer URL
    pub issuer: String,
    /// OAuth2 token endpoint for the client-credentials grant
    pub token_endpoint: String,
    /// Client ID
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
    /// Audience requested for the broker token
    #[serde(default)]
    pub audience: Option<String>,
}

/// A subject and the keys it may mint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdentityConfig {
    /// Exact `sub` claim
    pub subject: String,
    /// Restrict the binding to tokens validated by this provider
    #[serde(default)]
    pub idp: Option<String>,
    /// Keys in declaration order
    #[serde(default, deserialize_with = "ordered_keys")]
    pub keys: Vec<KeyBinding>,
}

/// A named key bound to an identity.
#[derive(Debug, Clone)]
pub struct KeyBinding {
    /// Key name, e.g. `MINIO_CREDENTIALS`
    pub name: String,
    /// How to mint it
    pub config: KeyConfig,
}

/// How a key is minted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyConfig {
    /// Access provider name
    pub provider: String,
    /// Role to assume (STS backends)
    #[serde(default)]
    pub role_arn: Option<String>,
    /// Default lifetime in seconds
    #[serde(default)]
    pub duration: Option<u64>,
    /// Upper bound for requested lifetimes, in seconds
    #[serde(default)]
    pub max_duration: Option<u64>,
    /// Backend field name → output variable name (empty = pass through)
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

/// A credential backend entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessProviderConfig {
    /// Provider name, referenced by [`KeyConfig::provider`]
    pub name: String,
    /// Backend type
    #[serde(rename = "type")]
    pub kind: AccessProviderKind,
    /// Service endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Region (AWS)
    #[serde(default)]
    pub region: Option<String>,
    /// Role used when a key does not set one
    #[serde(default)]
    pub role_arn: Option<String>,
}

/// Supported credential backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessProviderKind {
    /// `MinIO` STS `AssumeRoleWithWebIdentity`
    Minio,
    /// AWS STS `AssumeRoleWithWebIdentity`
    #[serde(alias = "aws")]
    AwsSts,
    /// Synthetic credentials for development
    Mock,
}

impl ConfigDocument {
    /// Parse document text, expanding `${VAR}` references first.
    pub fn parse(text: &str) -> Result<Self> {
        let expanded = expand_env_references(text);
        Ok(serde_yaml::from_str(&expanded)?)
    }

    /// Check the document on its own, before it is merged into a registry.
    pub fn validate(&self) -> Result<()> {
        let mut idp_names = HashSet::new();
        for idp in &self.client_idps {
            if idp.name.trim().is_empty() {
                return Err(invalid("client IdP with empty name"));
            }
            if idp.issuer.trim().is_empty() {
                return Err(invalid(format!("client IdP '{}' has no issuer", idp.name)));
            }
            if !idp_names.insert(idp.name.as_str()) {
                return Err(invalid(format!("duplicate client IdP '{}'", idp.name)));
            }
        }

        if self.client_idps.iter().filter(|i| i.is_default).count() > 1 {
            return Err(invalid("more than one client IdP is marked default"));
        }

        if let Some(ref broker) = self.broker_idp {
            if broker.name.trim().is_empty() || broker.token_endpoint.trim().is_empty() {
                return Err(invalid("brokerIdp needs a name and a tokenEndpoint"));
            }
        }

        for identity in &self.client_identities {
            if identity.subject.trim().is_empty() {
                return Err(invalid("client identity with empty subject"));
            }
            for key in &identity.keys {
                if key.name.trim().is_empty() {
                    return Err(invalid(format!(
                        "identity '{}' has a key with an empty name",
                        identity.subject
                    )));
                }
                if key.config.provider.trim().is_empty() {
                    return Err(invalid(format!(
                        "key '{}' of identity '{}' names no provider",
                        key.name, identity.subject
                    )));
                }
            }
        }

        let mut provider_names = HashSet::new();
        for provider in &self.access_providers {
            if !provider_names.insert(provider.name.as_str()) {
                return Err(invalid(format!(
                    "duplicate access provider '{}'",
                    provider.name
                )));
            }
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidDocument(message.into())
}

/// Accept either `audience: x` or `audience: [x, y]`.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// Deserialize a key mapping while keeping declaration order.
fn ordered_keys<'de, D>(deserializer: D) -> std::result::Result<Vec<KeyBinding>, D::Error>
where
    D: Deserializer<'de>,
{
    let mapping = Option::<serde_yaml::Mapping>::deserialize(deserializer)?.unwrap_or_default();

    mapping
        .into_iter()
        .map(|(name, value)| {
            let name = name
                .as_str()
                .ok_or_else(|| D::Error::custom("key names must be strings"))?
                .to_string();
            let config = serde_yaml::from_value(value).map_err(D::Error::custom)?;
            Ok(KeyBinding { name, config })
        })
        .collect()
}
