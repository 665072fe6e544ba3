//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Voidkey credential broker - exchange OIDC tokens for short-lived credentials
#[derive(Parser, Debug)]
#[command(name = "voidkey-broker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to application configuration file (YAML)
    #[arg(short, long, env = "VOIDKEY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "VOIDKEY_HOST")]
    pub host: Option<String>,

    /// Directory scanned for identity provider configuration
    #[arg(long, env = "CONFIG_DIR", global = true)]
    pub config_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "VOIDKEY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "VOIDKEY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the broker server (default)
    Serve,

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Sign a development token with the hello-world provider
    Token {
        /// Subject (`sub` claim) of the token
        #[arg(required = true)]
        subject: String,

        /// Token lifetime (e.g. 15m, 1h)
        #[arg(long, default_value = "1h")]
        ttl: String,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Load a configuration directory into a fresh broker and report the outcome
    Validate {
        /// Directory to validate (defaults to the configured directory)
        dir: Option<PathBuf>,
    },
}
