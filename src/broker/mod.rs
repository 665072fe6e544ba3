//! The credential broker.
//!
//! Holds every registered identity provider, the client identities and
//! their key bindings, the optional broker identity and the credential
//! backends. [`Broker`] is the contract the credentials service depends on;
//! [`CredentialBroker`] is the in-process implementation.
//!
//! The registry is filled while configuration is loaded and read-only
//! afterwards, so a single `RwLock` is enough. Guards are never held across
//! an `.await`.

pub mod audit;
pub mod broker_idp;
pub mod document;
pub mod identities;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::access::{AccessProvider, AccessRequest, build_access_provider, session_name};
use crate::config::Config;
use crate::idp::{HELLO_WORLD_PROVIDER, HelloWorldProvider, IdpProvider, JwksCache, OidcProvider};
use crate::{Error, Result};

use audit::AuditEvent;
use broker_idp::BrokerIdentity;
use document::{ConfigDocument, KeyConfig};
use identities::IdentityRegistry;

/// A registered identity provider as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpProviderDescriptor {
    /// Provider name
    pub name: String,
    /// Whether requests without an explicit provider use this one
    pub is_default: bool,
}

/// Credentials minted for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialResponse {
    /// Output variable name → value
    pub credentials: BTreeMap<String, String>,
    /// When the credentials stop working
    pub expires_at: DateTime<Utc>,
    /// Where the credentials came from
    pub metadata: CredentialMetadata,
}

/// Provenance of a [`CredentialResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialMetadata {
    /// Access provider that minted the credentials
    pub provider: String,
    /// Key the credentials were minted for
    pub key_name: String,
}

/// Broker contract consumed by the credentials service.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Register every entry of one configuration document.
    ///
    /// Registration is all-or-nothing per file.
    async fn register_idp_config_from_file(&self, path: &Path) -> Result<()>;

    /// All registered identity providers, in registration order.
    fn list_idp_providers(&self) -> Vec<IdpProviderDescriptor>;

    /// Look up a provider by name, or the default provider for `None`.
    fn get_idp_provider(&self, name: Option<&str>) -> Result<Arc<dyn IdpProvider>>;

    /// Keys `subject` may mint. Empty when the subject is unknown.
    fn get_available_keys(&self, subject: &str) -> Vec<String>;

    /// Validate `token` and mint credentials for `key`.
    async fn mint_key(
        &self,
        token: &str,
        key: &str,
        idp: Option<&str>,
        duration: Option<u64>,
    ) -> Result<CredentialResponse>;
}

struct RegisteredIdp {
    provider: Arc<dyn IdpProvider>,
    is_default: bool,
}

#[derive(Default)]
struct Registry {
    idps: Vec<RegisteredIdp>,
    broker_idp: Option<Arc<BrokerIdentity>>,
    identities: IdentityRegistry,
    access_providers: HashMap<String, Arc<dyn AccessProvider>>,
}

impl Registry {
    fn contains_idp(&self, name: &str) -> bool {
        self.idps.iter().any(|i| i.provider.name() == name)
    }

    /// The current default, unless it is the built-in provider.
    fn configured_default(&self) -> Option<&str> {
        self.idps
            .iter()
            .find(|i| i.is_default && i.provider.name() != HELLO_WORLD_PROVIDER)
            .map(|i| i.provider.name())
    }

    fn push_idp(&mut self, provider: Arc<dyn IdpProvider>, is_default: bool) {
        if is_default {
            for idp in &mut self.idps {
                idp.is_default = false;
            }
        }
        self.idps.push(RegisteredIdp {
            provider,
            is_default,
        });
    }
}

/// Counts of registered entries, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySummary {
    /// Identity providers, built-in included
    pub idps: usize,
    /// Client identity entries
    pub identities: usize,
    /// Access provider names, sorted
    pub access_providers: Vec<String>,
    /// Broker identity name, if configured
    pub broker_idp: Option<String>,
}

/// In-process [`Broker`].
pub struct CredentialBroker {
    registry: RwLock<Registry>,
    hello_world: Arc<HelloWorldProvider>,
    jwks_cache: Arc<JwksCache>,
    http: reqwest::Client,
    default_duration: Duration,
}

impl CredentialBroker {
    /// Create a broker with only the built-in `hello-world` provider.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let jwks_cache = Arc::new(JwksCache::new(
            config.identity.jwks_cache_ttl,
            config.identity.http_timeout,
        ));
        let http = jwks_cache.http().clone();
        let hello_world = Arc::new(HelloWorldProvider::new(&config.identity.hello_world));

        if hello_world.is_ephemeral() {
            warn!("hello-world provider has no configured secret; using a per-process random secret");
        }

        let mut registry = Registry::default();
        registry.push_idp(hello_world.clone(), true);

        Self {
            registry: RwLock::new(registry),
            hello_world,
            jwks_cache,
            http,
            default_duration: config.minting.default_duration,
        }
    }

    /// The built-in development provider.
    #[must_use]
    pub fn hello_world(&self) -> &Arc<HelloWorldProvider> {
        &self.hello_world
    }

    /// Counts of what has been registered so far.
    #[must_use]
    pub fn summary(&self) -> RegistrySummary {
        let registry = self.registry.read();
        let mut access_providers: Vec<String> = registry.access_providers.keys().cloned().collect();
        access_providers.sort();
        RegistrySummary {
            idps: registry.idps.len(),
            identities: registry.identities.len(),
            access_providers,
            broker_idp: registry.broker_idp.as_ref().map(|b| b.name().to_string()),
        }
    }

    /// Register an identity provider directly.
    ///
    /// # Errors
    ///
    /// Fails when the name is taken, or when `is_default` is set while a
    /// configured default already exists.
    pub fn register_idp_provider(&self, provider: Arc<dyn IdpProvider>, is_default: bool) -> Result<()> {
        let mut registry = self.registry.write();
        if registry.contains_idp(provider.name()) {
            return Err(duplicate("identity provider", provider.name()));
        }
        if is_default {
            if let Some(existing) = registry.configured_default() {
                return Err(second_default(existing, provider.name()));
            }
        }
        registry.push_idp(provider, is_default);
        Ok(())
    }

    /// Register a credential backend directly.
    ///
    /// # Errors
    ///
    /// Fails when the name is taken.
    pub fn register_access_provider(&self, provider: Arc<dyn AccessProvider>) -> Result<()> {
        let mut registry = self.registry.write();
        if registry.access_providers.contains_key(provider.name()) {
            return Err(duplicate("access provider", provider.name()));
        }
        registry
            .access_providers
            .insert(provider.name().to_string(), provider);
        Ok(())
    }

    /// Validate a parsed document against the registry and apply it.
    ///
    /// Nothing is registered unless the whole document is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDocument`] describing the first conflict.
    pub fn register_document(&self, document: ConfigDocument, source: &str) -> Result<()> {
        document.validate()?;

        let new_idps: Vec<(Arc<dyn IdpProvider>, bool)> = document
            .client_idps
            .iter()
            .map(|c| {
                let provider: Arc<dyn IdpProvider> =
                    Arc::new(OidcProvider::new(c, self.jwks_cache.clone()));
                (provider, c.is_default)
            })
            .collect();
        let new_access = document
            .access_providers
            .iter()
            .map(|c| build_access_provider(c, &self.http))
            .collect::<Result<Vec<_>>>()?;
        let new_broker = document
            .broker_idp
            .map(|c| Arc::new(BrokerIdentity::new(c, self.http.clone())));

        let mut registry = self.registry.write();

        for (provider, is_default) in &new_idps {
            if registry.contains_idp(provider.name()) {
                return Err(duplicate("identity provider", provider.name()));
            }
            if *is_default {
                if let Some(existing) = registry.configured_default() {
                    return Err(second_default(existing, provider.name()));
                }
            }
        }

        if let (Some(existing), Some(_)) = (&registry.broker_idp, &new_broker) {
            return Err(Error::InvalidDocument(format!(
                "brokerIdp already registered as '{}'",
                existing.name()
            )));
        }

        let declared: HashSet<&str> = new_idps.iter().map(|(p, _)| p.name()).collect();
        for identity in &document.client_identities {
            if let Some(ref idp) = identity.idp {
                if !declared.contains(idp.as_str()) && !registry.contains_idp(idp) {
                    return Err(Error::InvalidDocument(format!(
                        "identity '{}' references unknown IdP '{idp}'",
                        identity.subject
                    )));
                }
            }
        }

        for provider in &new_access {
            if registry.access_providers.contains_key(provider.name()) {
                return Err(duplicate("access provider", provider.name()));
            }
        }

        let idp_count = new_idps.len();
        let identity_count = document.client_identities.len();
        for (provider, is_default) in new_idps {
            registry.push_idp(provider, is_default);
        }
        if new_broker.is_some() {
            registry.broker_idp = new_broker;
        }
        registry.identities.extend(document.client_identities);
        for provider in new_access {
            registry
                .access_providers
                .insert(provider.name().to_string(), provider);
        }

        info!(
            source = %source,
            idps = idp_count,
            identities = identity_count,
            "Registered configuration document"
        );
        Ok(())
    }

    fn resolve_duration(&self, requested: Option<u64>, key: &KeyConfig) -> Duration {
        let seconds = requested
            .filter(|d| *d > 0)
            .or(key.duration)
            .unwrap_or(self.default_duration.as_secs());
        let capped = match key.max_duration {
            Some(max) if seconds > max => {
                debug!(requested = seconds, max, "Capping credential duration");
                max
            }
            _ => seconds,
        };
        Duration::from_secs(capped)
    }
}

#[async_trait]
impl Broker for CredentialBroker {
    async fn register_idp_config_from_file(&self, path: &Path) -> Result<()> {
        let text = tokio::fs::read_to_string(path).await?;
        let document = ConfigDocument::parse(&text)?;
        self.register_document(document, &path.display().to_string())
    }

    fn list_idp_providers(&self) -> Vec<IdpProviderDescriptor> {
        self.registry
            .read()
            .idps
            .iter()
            .map(|i| IdpProviderDescriptor {
                name: i.provider.name().to_string(),
                is_default: i.is_default,
            })
            .collect()
    }

    fn get_idp_provider(&self, name: Option<&str>) -> Result<Arc<dyn IdpProvider>> {
        let registry = self.registry.read();
        let found = match name {
            Some(name) => registry.idps.iter().find(|i| i.provider.name() == name),
            None => registry.idps.iter().find(|i| i.is_default),
        };
        found
            .map(|i| i.provider.clone())
            .ok_or_else(|| Error::UnknownIdp(name.unwrap_or("<default>").to_string()))
    }

    fn get_available_keys(&self, subject: &str) -> Vec<String> {
        self.registry.read().identities.available_keys(subject)
    }

    async fn mint_key(
        &self,
        token: &str,
        key: &str,
        idp: Option<&str>,
        duration: Option<u64>,
    ) -> Result<CredentialResponse> {
        let provider = self.get_idp_provider(idp)?;
        let claims = match provider.validate_token(token).await {
            Ok(claims) => claims,
            Err(e) => {
                audit::emit(&AuditEvent::failed(None, key, None, e.to_string()));
                return Err(e.into());
            }
        };
        let subject = claims.sub;
        let idp_name = provider.name();

        let (key_config, access, broker_identity) = {
            let registry = self.registry.read();
            let Some(key_config) = registry.identities.resolve_key(&subject, key, idp_name) else {
                audit::emit(&AuditEvent::denied(&subject, key, idp_name));
                return Err(Error::KeyNotAuthorized {
                    subject,
                    key: key.to_string(),
                });
            };
            let access = registry.access_providers.get(&key_config.provider).cloned();
            (key_config, access, registry.broker_idp.clone())
        };

        let Some(access) = access else {
            audit::emit(&AuditEvent::failed(
                Some(subject.as_str()),
                key,
                Some(key_config.provider.as_str()),
                "access provider not registered",
            ));
            return Err(Error::UnknownAccessProvider(key_config.provider));
        };

        let web_identity_token = match broker_identity {
            Some(ref broker) => broker.token().await?,
            None => token.to_string(),
        };

        let request = AccessRequest {
            key_name: key,
            subject: &subject,
            web_identity_token: &web_identity_token,
            duration: self.resolve_duration(duration, &key_config),
            role_arn: key_config.role_arn.as_deref(),
            session_name: session_name(&subject),
        };

        let issued = match access.mint(&request).await {
            Ok(issued) => issued,
            Err(e) => {
                audit::emit(&AuditEvent::failed(
                    Some(subject.as_str()),
                    key,
                    Some(access.name()),
                    e.to_string(),
                ));
                return Err(e);
            }
        };

        let credentials = map_outputs(issued.fields, &key_config.outputs, key);
        audit::emit(&AuditEvent::minted(
            &subject,
            key,
            idp_name,
            access.name(),
            issued.expires_at,
        ));

        Ok(CredentialResponse {
            credentials,
            expires_at: issued.expires_at,
            metadata: CredentialMetadata {
                provider: access.name().to_string(),
                key_name: key.to_string(),
            },
        })
    }
}

/// Rename backend fields per the key's `outputs` mapping.
///
/// An empty mapping passes every field through unchanged.
fn map_outputs(
    fields: BTreeMap<String, String>,
    outputs: &BTreeMap<String, String>,
    key: &str,
) -> BTreeMap<String, String> {
    if outputs.is_empty() {
        return fields;
    }

    let mut mapped = BTreeMap::new();
    for (source, target) in outputs {
        match fields.get(source) {
            Some(value) => {
                mapped.insert(target.clone(), value.clone());
            }
            None => warn!(key = %key, field = %source, "Backend did not return mapped field"),
        }
    }
    mapped
}

fn duplicate(kind: &str, name: &str) -> Error {
    Error::InvalidDocument(format!("{kind} '{name}' is already registered"))
}

fn second_default(existing: &str, candidate: &str) -> Error {
    Error::InvalidDocument(format!(
        "'{candidate}' cannot be default: '{existing}' already is"
    ))
}
