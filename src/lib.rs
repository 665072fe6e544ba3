//! Voidkey Broker Library
//!
//! Credential broker front door: validates an OIDC identity token against a
//! configurable set of identity providers, works out which keys the token's
//! subject may obtain, and mints short-lived credentials for them.
//!
//! # Features
//!
//! - **Configuration discovery**: YAML documents from one directory, loaded at startup
//! - **Identity resolution**: OIDC/JWKS providers with a one-shot `hello-world` fallback
//! - **Batch minting**: one, several, or all authorized keys per request
//! - **Credential backends**: STS `AssumeRoleWithWebIdentity` (AWS, `MinIO`) and a mock
//! - **Audit trail**: structured `credential.*` events

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod broker;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod idp;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    result.map_err(|e| Error::Internal(format!("Failed to initialize tracing: {e}")))
}
