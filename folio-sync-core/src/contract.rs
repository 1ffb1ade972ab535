#![allow(unused)]

//! # contract: interfaces to the outside world
//!
//! The pipeline only talks to two kinds of collaborators:
//! - a [`Store`]: the source drive folder or the destination bucket, listed
//!   recursively and copied to/from local files;
//! - a [`MediaHandler`]: watermarks images and videos, extracts thumbnails and
//!   probes dimensions.
//!
//! Both traits are async and annotated for `mockall`, so tests can swap in
//! deterministic mocks. Production implementations live in [`crate::rclone`]
//! and [`crate::ffmpeg`].

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mockall::{automock, predicate::*};

use crate::error::{HandlerError, StoreError};

/// Object metadata key holding the byte size of the original an object was derived from.
pub const SOURCE_SIZE_KEY: &str = "source-size";
/// Object metadata key holding the modification time of that original.
pub const SOURCE_MODTIME_KEY: &str = "source-modtime";

/// One object as reported by a store listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    /// Relative key, `/`-separated, case and spaces preserved.
    pub path: String,
    /// `None` when the store could not report a size.
    pub size: Option<u64>,
    pub modified_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

/// One object currently in the destination store.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    pub path: String,
    /// `None` when the listing could not read it.
    pub size: Option<u64>,
    pub modified_at: Option<DateTime<Utc>>,
    /// Size of the source original, recorded at publish time.
    pub source_size: Option<u64>,
}

impl RemoteEntry {
    /// The size to compare a source item against.
    ///
    /// Derived objects carry the size of their original in metadata; plain
    /// copies and objects published by other tools compare on their own size.
    /// `None` when neither is known.
    pub fn recorded_source_size(&self) -> Option<u64> {
        self.source_size.or(self.size)
    }
}

/// One object at the origin (drive folder or upstream bucket).
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEntry {
    pub path: String,
    /// `None` when the listing could not read it.
    pub size: Option<u64>,
    pub modified_at: Option<DateTime<Utc>>,
    /// Lower-cased extension without the dot; empty when there is none.
    pub extension: String,
}

impl SourceEntry {
    pub fn from_object(object: ObjectInfo) -> Self {
        let extension = object
            .path
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        SourceEntry {
            path: object.path,
            size: object.size,
            modified_at: object.modified_at,
            extension,
        }
    }
}

/// Metadata attached to every object the pipeline publishes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishMetadata {
    pub source_size: Option<u64>,
    pub source_modified_at: Option<DateTime<Utc>>,
}

impl PublishMetadata {
    pub fn for_source(source: &SourceEntry) -> Self {
        PublishMetadata {
            source_size: source.size,
            source_modified_at: source.modified_at,
        }
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(size) = self.source_size {
            pairs.push((SOURCE_SIZE_KEY.to_string(), size.to_string()));
        }
        if let Some(modified_at) = self.source_modified_at {
            pairs.push((SOURCE_MODTIME_KEY.to_string(), modified_at.to_rfc3339()));
        }
        pairs
    }

    pub fn from_map(map: &BTreeMap<String, String>) -> Self {
        PublishMetadata {
            source_size: map.get(SOURCE_SIZE_KEY).and_then(|v| v.trim().parse().ok()),
            source_modified_at: map
                .get(SOURCE_MODTIME_KEY)
                .and_then(|v| DateTime::parse_from_rfc3339(v.trim()).ok())
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// Pixel dimensions of an image or video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// What a probe learns about a media file.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MediaInfo {
    pub dimensions: Option<Dimensions>,
    /// Duration in seconds, for videos.
    pub duration: Option<f64>,
}

/// A listable object store addressed by relative keys.
///
/// Implementations must make `put` and `delete` idempotent: re-uploading the
/// same file to the same key, or deleting a missing key, succeeds.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Human-readable identifier for logs (e.g. the rclone remote).
    fn describe(&self) -> String;

    /// List every object, recursively. Returns [`StoreError::NotFound`] when the
    /// location itself does not exist yet.
    async fn list(&self) -> Result<Vec<ObjectInfo>, StoreError>;

    /// Copy the object at `key` to the local file `local`.
    async fn fetch(&self, key: &str, local: &Path) -> Result<(), StoreError>;

    /// Upload the local file to `key`, overwriting, with the given metadata.
    async fn put(&self, local: &Path, key: &str, metadata: &PublishMetadata) -> Result<(), StoreError>;

    /// Delete the object at `key`.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Media processing: deterministic for the same input and configuration.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait MediaHandler: Send + Sync {
    /// Watermark, downscale and re-encode an image as JPEG at `output`.
    async fn watermark_image(&self, input: &Path, output: &Path) -> Result<(), HandlerError>;

    /// Burn the watermark into a video, writing `output`.
    async fn watermark_video(&self, input: &Path, output: &Path) -> Result<(), HandlerError>;

    /// Extract a single JPEG frame at `at_secs` from `video`.
    async fn thumbnail(&self, video: &Path, at_secs: f64, output: &Path) -> Result<(), HandlerError>;

    /// Read dimensions and duration.
    async fn probe(&self, input: &Path) -> Result<MediaInfo, HandlerError>;
}
