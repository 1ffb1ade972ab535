//! Asset kinds, extension dispatch and the key layout of derived artifacts.

use std::collections::HashMap;
use std::fmt;

use crate::config::SyncConfig;

/// Extension of every image output and thumbnail.
pub const JPEG_EXTENSION: &str = "jpg";
/// Suffix appended to a video's stem to name its thumbnail.
pub const THUMBNAIL_SUFFIX: &str = "_thumb";

/// Fraction of a video's duration at which its thumbnail frame is taken.
const THUMBNAIL_POSITION: f64 = 0.15;
/// Distance kept from the end of the video so the seek lands on a frame.
const THUMBNAIL_END_GUARD_SECS: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// Watermarked, downscaled, re-encoded as JPEG.
    Image,
    /// Watermarked, thumbnail extracted from the original.
    Video,
    /// Copied unchanged.
    Passthrough,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Image => write!(f, "image"),
            AssetKind::Video => write!(f, "video"),
            AssetKind::Passthrough => write!(f, "passthrough"),
        }
    }
}

impl AssetKind {
    /// File name of the published output for a source file name.
    pub fn output_name(&self, file_name: &str) -> String {
        match self {
            AssetKind::Image => format!("{}.{}", file_stem(file_name), JPEG_EXTENSION),
            AssetKind::Video | AssetKind::Passthrough => file_name.to_string(),
        }
    }
}

/// Lookup table from lower-cased extension to [`AssetKind`].
#[derive(Debug, Clone)]
pub struct HandlerTable {
    by_extension: HashMap<String, AssetKind>,
}

impl HandlerTable {
    pub fn from_config(config: &SyncConfig) -> Self {
        let mut by_extension = HashMap::new();
        for ext in &config.image_extensions {
            by_extension.insert(normalise_extension(ext), AssetKind::Image);
        }
        for ext in &config.video_extensions {
            by_extension.insert(normalise_extension(ext), AssetKind::Video);
        }
        HandlerTable { by_extension }
    }

    /// Kind by extension alone. Unknown extensions are passthrough.
    pub fn kind_for(&self, extension: &str) -> AssetKind {
        self.by_extension
            .get(&normalise_extension(extension))
            .copied()
            .unwrap_or(AssetKind::Passthrough)
    }

    /// Whether files with this extension have probeable dimensions.
    pub fn is_media(&self, extension: &str) -> bool {
        self.kind_for(extension) != AssetKind::Passthrough
    }
}

fn normalise_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}

/// Splits `Folder/rest/of/path.ext` into the category folder and the rest.
pub fn split_key(path: &str) -> Option<(&str, &str)> {
    match path.split_once('/') {
        Some((folder, rest)) if !folder.is_empty() && !rest.is_empty() => Some((folder, rest)),
        _ => None,
    }
}

/// Last path segment.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// File name without its final extension. Dotfiles keep their name.
pub fn file_stem(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    }
}

/// Destination key for a source item of the given kind.
pub fn output_key(kind: AssetKind, source_path: &str) -> String {
    match source_path.rsplit_once('/') {
        Some((dir, name)) => format!("{dir}/{}", kind.output_name(name)),
        None => kind.output_name(source_path),
    }
}

/// Destination key of the thumbnail for the video at `source_path`.
///
/// `Vídeos/Trips/Clip.mp4` becomes `Thumbnails/Vídeos/Trips/Clip_thumb.jpg`.
pub fn thumbnail_key(thumbnails_prefix: &str, source_path: &str) -> String {
    let (dir, name) = match source_path.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, source_path),
    };
    let thumb_name = format!("{}{THUMBNAIL_SUFFIX}.{JPEG_EXTENSION}", file_stem(name));
    match dir {
        Some(dir) => format!("{thumbnails_prefix}/{dir}/{thumb_name}"),
        None => format!("{thumbnails_prefix}/{thumb_name}"),
    }
}

/// Seek position for a thumbnail: 15% into the video, never past its end.
pub fn thumbnail_timestamp(duration: Option<f64>) -> f64 {
    match duration {
        Some(d) if d.is_finite() && d > 0.0 => {
            let latest = (d - THUMBNAIL_END_GUARD_SECS).max(0.0);
            (d * THUMBNAIL_POSITION).min(latest)
        }
        _ => 0.0,
    }
}
