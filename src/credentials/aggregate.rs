//! Per-key outcome policy for multi-key mint requests.
//!
//! [`Aggregator`] is the only place that decides what a failed key means
//! for the rest of the batch. The iteration in
//! [`CredentialsService::mint_keys`](super::CredentialsService::mint_keys)
//! just feeds it outcomes in order.

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::MintResultSet;
use crate::Result;
use crate::broker::CredentialResponse;

/// How failures inside one mint request are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregationStrategy {
    /// Abort on the first failure and discard everything minted so far.
    #[default]
    FailFast,
    /// Skip failed keys and return what succeeded; fail only if nothing did.
    BestEffort,
}

/// Accumulates per-key outcomes under an [`AggregationStrategy`].
#[derive(Debug)]
pub struct Aggregator {
    strategy: AggregationStrategy,
    results: MintResultSet,
    last_error: Option<crate::Error>,
    failed: usize,
}

impl Aggregator {
    /// Start an empty batch.
    #[must_use]
    pub fn new(strategy: AggregationStrategy) -> Self {
        Self {
            strategy,
            results: MintResultSet::new(),
            last_error: None,
            failed: 0,
        }
    }

    /// Record the outcome for `key`.
    ///
    /// # Errors
    ///
    /// Returns the key's error unchanged when the batch must stop.
    pub fn record(&mut self, key: &str, outcome: Result<CredentialResponse>) -> Result<()> {
        match outcome {
            Ok(response) => {
                self.results.insert(key, response);
                Ok(())
            }
            Err(e) => match self.strategy {
                AggregationStrategy::FailFast => {
                    error!(key = %key, error = %e, "Failed to mint key");
                    Err(e)
                }
                AggregationStrategy::BestEffort => {
                    warn!(key = %key, error = %e, "Failed to mint key, continuing");
                    self.failed += 1;
                    self.last_error = Some(e);
                    Ok(())
                }
            },
        }
    }

    /// Close the batch.
    ///
    /// # Errors
    ///
    /// Under best-effort, returns the last failure when no key succeeded.
    pub fn finish(self) -> Result<MintResultSet> {
        if self.results.is_empty() {
            if let Some(e) = self.last_error {
                return Err(e);
            }
        }
        if self.failed > 0 {
            warn!(
                minted = self.results.len(),
                failed = self.failed,
                "Mint request completed partially"
            );
        }
        Ok(self.results)
    }
}
