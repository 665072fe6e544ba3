//! Voidkey Broker - exchange OIDC identity tokens for short-lived credentials

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use voidkey_broker::{
    broker::{Broker, CredentialBroker},
    cli::{Cli, Command, ConfigCommand},
    config::{Config, humantime_serde},
    credentials::load_configuration,
    idp::IdpProvider,
    server::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    // Handle subcommands
    match cli.command {
        Some(Command::Config(ConfigCommand::Validate { dir })) => run_validate(config, dir).await,
        Some(Command::Token { subject, ttl }) => run_token(&config, &subject, &ttl),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply command-line overrides
fn load_config(cli: &Cli) -> voidkey_broker::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host.clone_from(host);
    }
    if let Some(ref dir) = cli.config_dir {
        config.identity.config_dir.clone_from(dir);
    }

    Ok(config)
}

/// Run the broker server
async fn run_server(config: Config) -> ExitCode {
    let server = Server::new(config).await;

    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

/// Load a configuration directory into a fresh broker and report the outcome
async fn run_validate(config: Config, dir: Option<PathBuf>) -> ExitCode {
    let dir = dir.unwrap_or_else(|| config.identity.config_dir.clone());
    let broker = CredentialBroker::new(&config);
    let report = load_configuration(&broker, &dir).await;

    println!("Configuration directory: {}", dir.display());
    if let Some(ref e) = report.directory_error {
        println!("❌ Directory unreadable: {e}");
        return ExitCode::FAILURE;
    }

    for path in &report.registered {
        println!("✅ {}", path.display());
    }
    for path in &report.skipped {
        println!("⏭️  {} (no recognized configuration)", path.display());
    }
    for (path, reason) in &report.failed {
        println!("❌ {}: {reason}", path.display());
    }

    println!("\nIdentity providers:");
    for idp in broker.list_idp_providers() {
        let marker = if idp.is_default { " (default)" } else { "" };
        println!("  • {}{marker}", idp.name);
    }

    let summary = broker.summary();
    println!("\nClient identities: {}", summary.identities);
    if !summary.access_providers.is_empty() {
        println!("Access providers: {}", summary.access_providers.join(", "));
    }
    if let Some(ref name) = summary.broker_idp {
        println!("Broker IdP: {name}");
    }

    if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Print a hello-world token for local testing
fn run_token(config: &Config, subject: &str, ttl: &str) -> ExitCode {
    if config.identity.hello_world.secret.is_none() {
        eprintln!(
            "❌ No hello-world secret configured; set identity.hello_world.secret \
             (or VOIDKEY_IDENTITY__HELLO_WORLD__SECRET) to the server's value"
        );
        return ExitCode::FAILURE;
    }

    let ttl = match humantime_serde::parse(ttl) {
        Ok(ttl) => ttl,
        Err(e) => {
            eprintln!("❌ Invalid ttl '{ttl}': {e}");
            return ExitCode::FAILURE;
        }
    };

    let broker = CredentialBroker::new(config);
    let provider = broker.hello_world();
    match provider.sign(subject, ttl) {
        Ok(token) => {
            eprintln!("Signed by {} for {subject}, valid {}s", provider.name(), ttl.as_secs());
            println!("{token}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Failed to sign token: {e}");
            ExitCode::FAILURE
        }
    }
}
