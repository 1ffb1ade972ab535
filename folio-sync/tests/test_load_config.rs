use folio_sync::load_config::{load_config, DESTINATION_ENV, PUBLIC_URL_ENV, SOURCE_ENV};
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();
    file
}

fn clear_env() {
    env::remove_var(SOURCE_ENV);
    env::remove_var(DESTINATION_ENV);
    env::remove_var(PUBLIC_URL_ENV);
}

/// A full config file is loaded as written, with defaults for everything omitted.
#[tokio::test]
#[serial]
async fn test_load_config_success_with_defaults() {
    clear_env();
    let file = config_file(
        r#"
source: "gdrive:Portfolio"
destination: "r2:portfolio-assets"
public_url: "https://cdn.example.com"
categories:
  - folder: Fotografias
    key: fotografias
  - folder: Vídeos
    key: videos
  - folder: Melhores
    key: carousel
    passthrough: true
watermark:
  text: "© Estúdio"
"#,
    );

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.source, "gdrive:Portfolio");
    assert_eq!(config.destination, "r2:portfolio-assets");
    assert_eq!(config.sync.public_url, "https://cdn.example.com");
    assert_eq!(config.sync.categories.len(), 3);
    assert!(config.sync.categories[2].passthrough);
    assert_eq!(config.sync.watermark.text, "© Estúdio");
    assert_eq!(config.sync.workers, 1);
    assert_eq!(config.sync.thumbnails_prefix, "Thumbnails");
    assert!(config.sync.prune_orphans);
    assert_eq!(config.sync.manifest_path, PathBuf::from("data.json"));
    assert_eq!(config.sync.failure_log_path, PathBuf::from("failed_files.log"));
    assert!(config.sync.validate().is_ok());
}

/// Remotes and the public URL can come from the environment instead of the file.
#[tokio::test]
#[serial]
async fn test_load_config_environment_overrides_file() {
    clear_env();
    let file = config_file(
        r#"
source: "gdrive:Old"
categories:
  - folder: Fotografias
    key: fotografias
"#,
    );

    env::set_var(SOURCE_ENV, "gdrive:New");
    env::set_var(DESTINATION_ENV, "r2:bucket");
    env::set_var(PUBLIC_URL_ENV, "https://pub.example.r2.dev");

    let result = load_config(file.path());
    clear_env();
    let config = result.expect("Config should load with environment overrides");

    assert_eq!(config.source, "gdrive:New");
    assert_eq!(config.destination, "r2:bucket");
    assert_eq!(config.sync.public_url, "https://pub.example.r2.dev");
}

#[tokio::test]
#[serial]
async fn test_load_config_missing_destination_is_an_error() {
    clear_env();
    let file = config_file(
        r#"
source: "gdrive:Portfolio"
public_url: "https://cdn.example.com"
categories: []
"#,
    );

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("No destination remote configured"), "got {err}");
}

#[tokio::test]
#[serial]
async fn test_load_config_rejects_identical_remotes() {
    clear_env();
    let file = config_file(
        r#"
source: "r2:bucket/"
destination: "r2:bucket"
public_url: "https://cdn.example.com"
categories: []
"#,
    );

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("must be different"), "got {err}");
}

#[tokio::test]
#[serial]
async fn test_load_config_invalid_yaml() {
    clear_env();
    let file = config_file("source: [unterminated\n");

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"), "got {err}");
}

#[tokio::test]
#[serial]
async fn test_load_config_missing_file() {
    clear_env();
    let err = load_config("/no/such/folio-sync.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"), "got {err}");
}
