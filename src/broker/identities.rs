//! Key authorization: maps token subjects to the keys they may mint.
//!
//! # Design
//!
//! Identity entries are kept in registration order (file order, then
//! declaration order inside each file). When several entries bind the same
//! key for a subject, the **first matching entry** wins.
//!
//! ## Match criteria
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `subject` | Exact `sub` claim |
//! | `idp` | Provider that validated the token (unset = any provider) |

use tracing::debug;

use super::document::{ClientIdentityConfig, KeyConfig};

/// Registered client identities.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    entries: Vec<ClientIdentityConfig>,
}

impl IdentityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append entries from a newly registered document.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = ClientIdentityConfig>) {
        self.entries.extend(entries);
    }

    /// Number of registered identity entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no identity has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every key any entry grants to `subject`, in registration order,
    /// without duplicates.
    #[must_use]
    pub fn available_keys(&self, subject: &str) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for entry in self.entries.iter().filter(|e| e.subject == subject) {
            for binding in &entry.keys {
                if !keys.iter().any(|k| k == &binding.name) {
                    keys.push(binding.name.clone());
                }
            }
        }
        keys
    }

    /// Resolve the configuration for `key` when requested by `subject`
    /// through the provider named `idp`.
    ///
    /// Returns `None` if no entry authorizes the combination.
    #[must_use]
    pub fn resolve_key(&self, subject: &str, key: &str, idp: &str) -> Option<KeyConfig> {
        for entry in &self.entries {
            if !matches_entry(entry, subject, idp) {
                continue;
            }
            if let Some(binding) = entry.keys.iter().find(|b| b.name == key) {
                debug!(subject = %subject, key = %key, idp = %idp, "Key binding matched");
                return Some(binding.config.clone());
            }
        }
        debug!(subject = %subject, key = %key, idp = %idp, "No key binding matched");
        None
    }
}

/// Evaluate whether an entry applies to the subject/provider pair.
fn matches_entry(entry: &ClientIdentityConfig, subject: &str, idp: &str) -> bool {
    if entry.subject != subject {
        return false;
    }

    if let Some(ref required) = entry.idp {
        if required != idp {
            return false;
        }
    }

    true
}
