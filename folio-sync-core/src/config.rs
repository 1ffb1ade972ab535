use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SyncError;

/// Immutable configuration for one run. Passed by reference into every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL the destination bucket is served from.
    #[serde(default)]
    pub public_url: String,
    /// Top-level folders that hold publishable media, in manifest order.
    pub categories: Vec<Category>,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_thumbnails_prefix")]
    pub thumbnails_prefix: String,
    /// Glob patterns (`*.tmp`, `drafts/**`) for source items to ignore.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
    #[serde(default)]
    pub watermark: WatermarkConfig,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub prune_orphans: bool,
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,
    #[serde(default = "default_failure_log_path")]
    pub failure_log_path: PathBuf,
}

/// A top-level folder of the source and destination, and its manifest key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub folder: String,
    pub key: String,
    /// Copy every item unchanged, whatever its extension.
    #[serde(default)]
    pub passthrough: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkConfig {
    pub text: String,
    #[serde(default)]
    pub font_file: Option<PathBuf>,
    /// 0.0 (invisible) to 1.0 (opaque).
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    /// Font size as a fraction of the frame width.
    #[serde(default = "default_font_size_ratio")]
    pub font_size_ratio: f32,
    /// Margin from the bottom-right corner as a fraction of the frame width.
    #[serde(default = "default_margin_ratio")]
    pub margin_ratio: f32,
    #[serde(default = "default_max_image_width")]
    pub max_image_width: u32,
    /// 1-100, like common JPEG encoders.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        WatermarkConfig {
            text: "©".to_string(),
            font_file: None,
            opacity: default_opacity(),
            font_size_ratio: default_font_size_ratio(),
            margin_ratio: default_margin_ratio(),
            max_image_width: default_max_image_width(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

fn default_languages() -> Vec<String> {
    vec!["pt".into(), "en".into(), "es".into()]
}
fn default_thumbnails_prefix() -> String {
    "Thumbnails".into()
}
fn default_image_extensions() -> Vec<String> {
    vec!["jpg".into(), "jpeg".into(), "png".into(), "webp".into()]
}
fn default_video_extensions() -> Vec<String> {
    vec!["mp4".into(), "mov".into(), "avi".into()]
}
fn default_workers() -> usize {
    1
}
fn default_command_timeout_secs() -> u64 {
    600
}
fn default_true() -> bool {
    true
}
fn default_manifest_path() -> PathBuf {
    PathBuf::from("data.json")
}
fn default_failure_log_path() -> PathBuf {
    PathBuf::from("failed_files.log")
}
fn default_opacity() -> f32 {
    0.8
}
fn default_font_size_ratio() -> f32 {
    0.045
}
fn default_margin_ratio() -> f32 {
    0.02
}
fn default_max_image_width() -> u32 {
    1920
}
fn default_jpeg_quality() -> u8 {
    85
}

impl SyncConfig {
    /// A configuration with defaults for everything but the URL and categories.
    pub fn new(public_url: impl Into<String>, categories: Vec<Category>) -> Self {
        SyncConfig {
            public_url: public_url.into(),
            categories,
            languages: default_languages(),
            thumbnails_prefix: default_thumbnails_prefix(),
            exclude: Vec::new(),
            image_extensions: default_image_extensions(),
            video_extensions: default_video_extensions(),
            watermark: WatermarkConfig::default(),
            workers: default_workers(),
            command_timeout_secs: default_command_timeout_secs(),
            prune_orphans: true,
            manifest_path: default_manifest_path(),
            failure_log_path: default_failure_log_path(),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn category_for_folder(&self, folder: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.folder == folder)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.public_url.trim().is_empty() {
            return Err(SyncError::Config("public_url must not be empty".into()));
        }
        if self.categories.is_empty() {
            return Err(SyncError::Config("at least one category is required".into()));
        }
        if self.languages.is_empty() {
            return Err(SyncError::Config("at least one language is required".into()));
        }
        if self.workers == 0 {
            return Err(SyncError::Config("workers must be at least 1".into()));
        }
        if self.command_timeout_secs == 0 {
            return Err(SyncError::Config("command_timeout_secs must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.watermark.opacity) {
            return Err(SyncError::Config("watermark.opacity must be between 0 and 1".into()));
        }
        if !(1..=100).contains(&self.watermark.jpeg_quality) {
            return Err(SyncError::Config("watermark.jpeg_quality must be between 1 and 100".into()));
        }
        if self.thumbnails_prefix.is_empty() || self.thumbnails_prefix.contains('/') {
            return Err(SyncError::Config(format!(
                "thumbnails_prefix must be a single folder name, got {:?}",
                self.thumbnails_prefix
            )));
        }

        let mut folders = HashSet::new();
        let mut keys = HashSet::new();
        for category in &self.categories {
            if category.folder.is_empty() || category.folder.contains('/') {
                return Err(SyncError::Config(format!(
                    "category folder must be a single folder name, got {:?}",
                    category.folder
                )));
            }
            if category.folder == self.thumbnails_prefix {
                return Err(SyncError::Config(format!(
                    "category folder {:?} collides with thumbnails_prefix",
                    category.folder
                )));
            }
            if !folders.insert(category.folder.as_str()) {
                return Err(SyncError::Config(format!("duplicate category folder {:?}", category.folder)));
            }
            if !keys.insert(category.key.as_str()) {
                return Err(SyncError::Config(format!("duplicate category key {:?}", category.key)));
            }
        }
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            public_url = %self.public_url,
            categories = self.categories.len(),
            workers = self.workers,
            prune_orphans = self.prune_orphans,
            manifest_path = %self.manifest_path.display(),
            "Loaded SyncConfig"
        );
        debug!(?self, "SyncConfig loaded (full debug)");
    }
}
