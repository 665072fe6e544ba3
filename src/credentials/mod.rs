//! Credentials service: identity resolution and multi-key minting on top
//! of a [`Broker`].

pub mod aggregate;
pub mod handler;
pub mod loader;

use std::sync::Arc;

use serde::Serialize;
use serde::ser::SerializeMap;
use tracing::{debug, info};

pub use aggregate::{AggregationStrategy, Aggregator};
pub use handler::router;
pub use loader::{LoadReport, load_configuration};

use crate::broker::{Broker, CredentialResponse, IdpProviderDescriptor};
use crate::config::Config;
use crate::{Error, Result};

/// Minted credentials keyed by key name, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MintResultSet {
    entries: Vec<(String, CredentialResponse)>,
}

impl MintResultSet {
    /// Empty result set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the response for `key`. A repeated key keeps its first position.
    pub fn insert(&mut self, key: &str, response: CredentialResponse) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = response,
            None => self.entries.push((key.to_string(), response)),
        }
    }

    /// Response for `key`, if minted.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&CredentialResponse> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, r)| r)
    }

    /// Number of minted keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was minted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key names in processing order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Entries in processing order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CredentialResponse)> {
        self.entries.iter().map(|(k, r)| (k.as_str(), r))
    }
}

impl Serialize for MintResultSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, response) in &self.entries {
            map.serialize_entry(key, response)?;
        }
        map.end()
    }
}

/// Orchestrates subject extraction and minting across keys.
pub struct CredentialsService {
    broker: Arc<dyn Broker>,
    fallback_provider: String,
    strategy: AggregationStrategy,
}

impl CredentialsService {
    /// Build the service from application configuration.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, config: &Config) -> Self {
        Self::with_options(
            broker,
            config.identity.fallback_provider.clone(),
            config.minting.strategy,
        )
    }

    /// Build the service with an explicit fallback provider and strategy.
    #[must_use]
    pub fn with_options(
        broker: Arc<dyn Broker>,
        fallback_provider: impl Into<String>,
        strategy: AggregationStrategy,
    ) -> Self {
        Self {
            broker,
            fallback_provider: fallback_provider.into(),
            strategy,
        }
    }

    /// The broker this service delegates to.
    #[must_use]
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Registered identity providers, as the broker reports them.
    #[must_use]
    pub fn list_idp_providers(&self) -> Vec<IdpProviderDescriptor> {
        self.broker.list_idp_providers()
    }

    /// Keys `subject` may mint, as the broker reports them.
    #[must_use]
    pub fn get_available_keys(&self, subject: &str) -> Vec<String> {
        self.broker.get_available_keys(subject)
    }

    /// Validate `token` and return its `sub` claim.
    ///
    /// Any failure with the requested (or default) provider triggers exactly
    /// one retry with the fallback provider.
    ///
    /// # Errors
    ///
    /// [`Error::SubjectExtraction`] carrying the fallback's failure.
    pub async fn extract_subject(&self, token: &str, idp: Option<&str>) -> Result<String> {
        let primary = match self.broker.get_idp_provider(idp) {
            Ok(provider) => provider.validate_token(token).await.map_err(Error::from),
            Err(e) => Err(e),
        };

        match primary {
            Ok(claims) => return Ok(claims.sub),
            Err(e) => debug!(
                idp = idp.unwrap_or("<default>"),
                fallback = %self.fallback_provider,
                error = %e,
                "Subject extraction failed, trying fallback provider"
            ),
        }

        let fallback = self
            .broker
            .get_idp_provider(Some(self.fallback_provider.as_str()))
            .map_err(|e| Error::SubjectExtraction(e.to_string()))?;
        fallback
            .validate_token(token)
            .await
            .map(|claims| claims.sub)
            .map_err(|e| Error::SubjectExtraction(e.to_string()))
    }

    /// Mint credentials for the selected keys.
    ///
    /// With `all`, the token's subject is resolved and every key it may mint
    /// is used; an explicit `keys` list is then ignored. Otherwise `keys`
    /// must be non-empty and is minted in the given order.
    ///
    /// # Errors
    ///
    /// [`Error::MissingKeySelection`] when neither selection is made,
    /// [`Error::NoKeysAvailable`] when `all` finds nothing, and otherwise
    /// whatever the aggregation strategy lets through.
    pub async fn mint_keys(
        &self,
        token: &str,
        idp: Option<&str>,
        keys: Option<&[String]>,
        duration: Option<u64>,
        all: bool,
    ) -> Result<MintResultSet> {
        let keys: Vec<String> = if all {
            let subject = self.extract_subject(token, idp).await?;
            let available = self.broker.get_available_keys(&subject);
            if available.is_empty() {
                return Err(Error::NoKeysAvailable);
            }
            available
        } else {
            match keys {
                Some(keys) if !keys.is_empty() => keys.to_vec(),
                _ => return Err(Error::MissingKeySelection),
            }
        };

        let mut aggregator = Aggregator::new(self.strategy);
        for key in &keys {
            let outcome = self.broker.mint_key(token, key, idp, duration).await;
            aggregator.record(key, outcome)?;
        }
        let results = aggregator.finish()?;

        info!(keys = results.len(), all, "Minted credentials");
        Ok(results)
    }
}
