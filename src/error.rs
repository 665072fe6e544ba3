//! Error types for the credential broker

use std::io;

use thiserror::Error;

use crate::idp::IdpError;

/// Result type alias for the credential broker
pub type Result<T> = std::result::Result<T, Error>;

/// Credential broker errors
#[derive(Error, Debug)]
pub enum Error {
    /// Application configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configuration document was rejected during registration
    #[error("Invalid configuration document: {0}")]
    InvalidDocument(String),

    /// The request carried no OIDC token
    #[error("OIDC token is required")]
    MissingToken,

    /// The key query carried no `token` parameter
    #[error("Token parameter is required")]
    MissingTokenParameter,

    /// The request named neither keys nor the `all` option
    #[error("Either specify keys to mint or use the all option")]
    MissingKeySelection,

    /// The identity has no keys it may mint
    #[error("No keys available for identity")]
    NoKeysAvailable,

    /// Both the requested and the fallback identity provider failed
    #[error("Failed to extract subject from token: {0}")]
    SubjectExtraction(String),

    /// No identity provider registered under this name
    #[error("Identity provider not found: {0}")]
    UnknownIdp(String),

    /// Token validation failed inside an identity provider
    #[error(transparent)]
    Idp(#[from] IdpError),

    /// The subject may not mint this key
    #[error("Identity {subject} is not authorized for key {key}")]
    KeyNotAuthorized {
        /// Token subject
        subject: String,
        /// Requested key name
        key: String,
    },

    /// A key references an access provider that was never registered
    #[error("Access provider not found: {0}")]
    UnknownAccessProvider(String),

    /// A credential backend failed to mint
    #[error("Credential minting failed ({provider}): {message}")]
    Mint {
        /// Access provider name
        provider: String,
        /// Backend error detail
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a minting error for a named access provider
    pub fn mint(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mint {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether the error stems from the shape of the request rather than
    /// from an identity provider or credential backend
    #[must_use]
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::MissingToken | Self::MissingTokenParameter | Self::MissingKeySelection
        )
    }
}
