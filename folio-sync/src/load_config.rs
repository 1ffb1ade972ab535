/// `load_config` module: reads the YAML run configuration and applies environment overrides.
///
/// This is the only place where the user-supplied YAML is parsed. The result holds the
/// two rclone remotes plus the core [`SyncConfig`], which is flattened into the same
/// YAML document.
///
/// # Environment overrides
/// - `FOLIO_SYNC_SOURCE` replaces `source`
/// - `FOLIO_SYNC_DESTINATION` replaces `destination`
/// - `FOLIO_SYNC_PUBLIC_URL` replaces `public_url`
///
/// A `.env` file next to the working directory is loaded by `main` before this runs.
///
/// # Errors
/// All errors use `anyhow::Error` with the config path in the message, and are surfaced
/// at the CLI boundary.
use anyhow::{bail, Result};
use folio_sync_core::config::SyncConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub const SOURCE_ENV: &str = "FOLIO_SYNC_SOURCE";
pub const DESTINATION_ENV: &str = "FOLIO_SYNC_DESTINATION";
pub const PUBLIC_URL_ENV: &str = "FOLIO_SYNC_PUBLIC_URL";

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    /// rclone path holding the originals, e.g. `gdrive:Portfolio`.
    #[serde(default)]
    pub source: String,
    /// rclone path of the public bucket, e.g. `r2:portfolio-assets`.
    #[serde(default)]
    pub destination: String,
    #[serde(flatten)]
    pub sync: SyncConfig,
}

/// Loads the YAML config file, then applies environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let mut config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    apply_env_overrides(&mut config);

    if config.source.trim().is_empty() {
        bail!("No source remote configured: set `source` or {SOURCE_ENV}");
    }
    if config.destination.trim().is_empty() {
        bail!("No destination remote configured: set `destination` or {DESTINATION_ENV}");
    }
    if config.source.trim_end_matches('/') == config.destination.trim_end_matches('/') {
        bail!("Source and destination must be different remotes, both are {:?}", config.source);
    }

    Ok(config)
}

fn apply_env_overrides(config: &mut CliConfig) {
    if let Some(value) = env_override(SOURCE_ENV) {
        info!(var = SOURCE_ENV, "Source remote overridden from environment");
        config.source = value;
    }
    if let Some(value) = env_override(DESTINATION_ENV) {
        info!(var = DESTINATION_ENV, "Destination remote overridden from environment");
        config.destination = value;
    }
    if let Some(value) = env_override(PUBLIC_URL_ENV) {
        info!(var = PUBLIC_URL_ENV, "Public URL overridden from environment");
        config.sync.public_url = value;
    }
}

fn env_override(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}
