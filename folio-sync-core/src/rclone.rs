//! [`Store`] backed by the `rclone` CLI.
//!
//! Works for any rclone remote: the drive folder the originals live in and the
//! bucket that serves the published assets.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::contract::{ObjectInfo, PublishMetadata, Store};
use crate::error::{CommandError, StoreError};
use crate::exec;

const RCLONE: &str = "rclone";
/// rclone's exit code for "directory not found".
const EXIT_DIR_NOT_FOUND: i32 = 3;
/// rclone's exit code for "file not found".
const EXIT_FILE_NOT_FOUND: i32 = 4;

pub struct RcloneStore {
    /// An rclone path such as `gdrive:Portfolio` or `r2:portfolio-bucket`.
    remote: String,
    timeout: Duration,
}

impl RcloneStore {
    pub fn new(remote: impl Into<String>, timeout: Duration) -> Self {
        RcloneStore {
            remote: remote.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn object_path(&self, key: &str) -> String {
        format!("{}/{}", self.remote, key)
    }
}

/// One row of `rclone lsjson` output.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsjsonRow {
    path: String,
    #[serde(default = "unknown_size")]
    size: i64,
    #[serde(default)]
    mod_time: Option<String>,
    #[serde(default)]
    is_dir: bool,
    #[serde(default)]
    metadata: Option<BTreeMap<String, String>>,
}

fn unknown_size() -> i64 {
    -1
}

/// Parse `rclone lsjson` output. Directories are dropped; a size of `-1`
/// means the backend could not tell.
pub fn parse_lsjson(raw: &str) -> Result<Vec<ObjectInfo>, StoreError> {
    let rows: Vec<LsjsonRow> =
        serde_json::from_str(raw).map_err(|e| StoreError::Malformed(format!("rclone lsjson: {e}")))?;
    Ok(rows
        .into_iter()
        .filter(|row| !row.is_dir)
        .map(|row| ObjectInfo {
            path: row.path,
            size: u64::try_from(row.size).ok(),
            modified_at: row
                .mod_time
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
            metadata: row.metadata.unwrap_or_default(),
        })
        .collect())
}

fn is_not_found(err: &CommandError) -> bool {
    matches!(err.code(), Some(EXIT_DIR_NOT_FOUND) | Some(EXIT_FILE_NOT_FOUND))
        || err.stderr().to_lowercase().contains("directory not found")
        || err.stderr().to_lowercase().contains("object not found")
}

/// `--metadata-set` arguments for the given metadata.
fn metadata_args(metadata: &PublishMetadata) -> Vec<String> {
    let pairs = metadata.to_pairs();
    if pairs.is_empty() {
        return Vec::new();
    }
    let mut args = vec!["--metadata".to_string()];
    for (key, value) in pairs {
        args.push("--metadata-set".to_string());
        args.push(format!("{key}={value}"));
    }
    args
}

#[async_trait]
impl Store for RcloneStore {
    fn describe(&self) -> String {
        self.remote.clone()
    }

    async fn list(&self) -> Result<Vec<ObjectInfo>, StoreError> {
        let args = ["lsjson", self.remote.as_str(), "-R", "--files-only", "--metadata"];
        match exec::run(RCLONE, args, self.timeout).await {
            Ok(output) => {
                let objects = parse_lsjson(&output.stdout)?;
                tracing::debug!(remote = %self.remote, objects = objects.len(), "Listed rclone remote");
                Ok(objects)
            }
            Err(e) if is_not_found(&e) => Err(StoreError::NotFound(self.remote.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch(&self, key: &str, local: &Path) -> Result<(), StoreError> {
        let src = self.object_path(key);
        let args = vec!["copyto".into(), src, local.display().to_string()];
        match exec::run(RCLONE, args, self.timeout).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, local: &Path, key: &str, metadata: &PublishMetadata) -> Result<(), StoreError> {
        let mut args = vec!["copyto".to_string(), local.display().to_string(), self.object_path(key)];
        args.extend(metadata_args(metadata));
        exec::run(RCLONE, args, self.timeout).await?;
        tracing::debug!(remote = %self.remote, key, "Uploaded object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let args = vec!["deletefile".to_string(), self.object_path(key)];
        match exec::run(RCLONE, args, self.timeout).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                tracing::debug!(remote = %self.remote, key, "Object already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
