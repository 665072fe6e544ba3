//! Configuration management

use std::{
    env,
    path::{Path, PathBuf},
    sync::LazyLock,
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::credentials::AggregationStrategy;
use crate::idp::HELLO_WORLD_PROVIDER;
use crate::{Error, Result};

/// `${VAR}` or `${VAR:-default}`
static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("static regex is valid")
});

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Identity provider configuration
    pub identity: IdentityConfig,
    /// Credential minting configuration
    pub minting: MintingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Allow cross-origin requests from any origin
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024, // 1MB
            cors: true,
        }
    }
}

/// Identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Directory scanned for IdP configuration documents at startup
    pub config_dir: PathBuf,
    /// Provider retried once when the requested provider fails
    pub fallback_provider: String,
    /// Built-in development provider
    pub hello_world: HelloWorldConfig,
    /// How long a fetched JWKS stays cached
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,
    /// Timeout for outbound discovery, JWKS and token requests
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("config"),
            fallback_provider: HELLO_WORLD_PROVIDER.to_string(),
            hello_world: HelloWorldConfig::default(),
            jwks_cache_ttl: Duration::from_secs(3600),
            http_timeout: Duration::from_secs(10),
        }
    }
}

/// `hello-world` provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloWorldConfig {
    /// Expected `iss` claim
    pub issuer: String,
    /// HS256 shared secret (supports `env:VAR_NAME`).
    ///
    /// When unset, a random secret is generated per process and only
    /// tokens signed by that process validate.
    pub secret: Option<String>,
    /// Expected `aud` claim (not checked when unset)
    pub audience: Option<String>,
}

impl Default for HelloWorldConfig {
    fn default() -> Self {
        Self {
            issuer: HELLO_WORLD_PROVIDER.to_string(),
            secret: None,
            audience: None,
        }
    }
}

/// Credential minting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MintingConfig {
    /// How per-key failures inside one mint request are handled
    pub strategy: AggregationStrategy,
    /// Credential lifetime when neither the request nor the key sets one
    #[serde(with = "humantime_serde")]
    pub default_duration: Duration,
}

impl Default for MintingConfig {
    fn default() -> Self {
        Self {
            strategy: AggregationStrategy::FailFast,
            default_duration: Duration::from_secs(3600),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (VOIDKEY_ prefix)
        figment = figment.merge(Env::prefixed("VOIDKEY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();
        config.resolve_secrets();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Resolve `env:VAR_NAME` and `${VAR}` references in secret values
    fn resolve_secrets(&mut self) {
        let Some(ref secret) = self.identity.hello_world.secret else {
            return;
        };
        let resolved = if let Some(var_name) = secret.strip_prefix("env:") {
            env::var(var_name).ok()
        } else {
            Some(expand_env_references(secret))
        };
        self.identity.hello_world.secret = resolved.filter(|s| !s.is_empty());
    }
}

/// Expand `${VAR}` and `${VAR:-default}` patterns using the process environment.
///
/// Unset variables without a default expand to the empty string.
#[must_use]
pub fn expand_env_references(value: &str) -> String {
    ENV_REFERENCE
        .replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    /// or a bare number of seconds
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(s) => parse(&s).map_err(serde::de::Error::custom),
        }
    }

    /// Parse `100ms`, `30s`, `5m`, `1h` or a bare number of seconds.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem for malformed or overflowing input.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let (digits, unit_secs) = if let Some(ms) = s.strip_suffix("ms") {
            let ms = ms.parse::<u64>().map_err(|e| format!("invalid duration '{s}': {e}"))?;
            return Ok(Duration::from_millis(ms));
        } else if let Some(secs) = s.strip_suffix('s') {
            (secs, 1)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, 3600)
        } else {
            (s, 1)
        };

        let value = digits
            .parse::<u64>()
            .map_err(|e| format!("invalid duration '{s}': {e}"))?;
        value
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too large"))
    }
}
