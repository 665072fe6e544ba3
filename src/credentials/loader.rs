//! Startup discovery of configuration documents.
//!
//! Scans one directory (non-recursively) for `.yaml`/`.yml` files and hands
//! each file that carries broker configuration to
//! [`Broker::register_idp_config_from_file`]. Nothing here fails the caller:
//! problems are logged, recorded in the [`LoadReport`], and loading moves on.
//!
//! ```no_run
//! use std::path::Path;
//! use voidkey_broker::{broker::CredentialBroker, config::Config};
//! use voidkey_broker::credentials::load_configuration;
//!
//! # tokio_test::block_on(async {
//! let broker = CredentialBroker::new(&Config::default());
//! let report = load_configuration(&broker, Path::new("config")).await;
//! if !report.is_clean() {
//!     eprintln!("{} file(s) rejected", report.failed.len());
//! }
//! # });
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::broker::document::has_recognized_configuration;

/// Outcome of a configuration scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Directory that was scanned
    pub config_dir: PathBuf,
    /// Files registered with the broker
    pub registered: Vec<PathBuf>,
    /// Files ignored (unparseable or without recognized keys)
    pub skipped: Vec<PathBuf>,
    /// Files the broker rejected, with the reason
    pub failed: Vec<(PathBuf, String)>,
    /// Set when the directory itself could not be read
    pub directory_error: Option<String>,
}

impl LoadReport {
    fn new(config_dir: &Path) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            ..Self::default()
        }
    }

    /// Whether every candidate file was either registered or skipped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.directory_error.is_none()
    }
}

/// Load every configuration document in `config_dir` into `broker`.
///
/// The directory is created when missing.
pub async fn load_configuration(broker: &dyn Broker, config_dir: &Path) -> LoadReport {
    let mut report = LoadReport::new(config_dir);

    let files = match yaml_files(config_dir).await {
        Ok(files) => files,
        Err(e) => {
            error!(error = %e, path = %config_dir.display(), "Failed to read configuration directory");
            info!("Continuing with default provider only");
            report.directory_error = Some(e.to_string());
            return report;
        }
    };

    if files.is_empty() {
        info!(path = %config_dir.display(), "No YAML files found, using default provider only");
        return report;
    }

    info!(count = files.len(), path = %config_dir.display(), "Found configuration files");

    for path in files {
        let name = file_name(&path);

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, file = %name, "Failed to read configuration file");
                report.failed.push((path, e.to_string()));
                continue;
            }
        };

        let recognized = serde_yaml::from_str::<serde_yaml::Value>(&text)
            .map(|value| has_recognized_configuration(&value));
        match recognized {
            Ok(true) => {}
            Ok(false) => {
                debug!(file = %name, "Skipping file without recognized configuration");
                report.skipped.push(path);
                continue;
            }
            Err(e) => {
                debug!(error = %e, file = %name, "Skipping unparseable file");
                report.skipped.push(path);
                continue;
            }
        }

        match broker.register_idp_config_from_file(&path).await {
            Ok(()) => {
                info!(file = %name, "Loaded configuration");
                report.registered.push(path);
            }
            Err(e) => {
                error!(error = %e, file = %name, "Failed to load configuration");
                report.failed.push((path, e.to_string()));
            }
        }
    }

    info!(
        registered = report.registered.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Configuration loading complete"
    );
    report
}

/// Create `dir` if needed and list its YAML entries, sorted by name.
///
/// Symlinks are followed. Entries that cannot be stat'ed are kept so the
/// read that follows records them as failed.
async fn yaml_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !tokio::fs::try_exists(dir).await? {
        tokio::fs::create_dir_all(dir).await?;
        info!(path = %dir.display(), "Created configuration directory");
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if !is_yaml {
            continue;
        }
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => debug!(path = %path.display(), "Skipping directory"),
            Ok(_) => files.push(path),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Cannot stat configuration entry");
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}
