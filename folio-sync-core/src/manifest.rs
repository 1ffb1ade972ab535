//! # manifest: the JSON view of the destination consumed by the website
//!
//! The manifest is rebuilt from scratch on every run from a fresh listing of
//! the destination, so it always matches what is actually published. Only two
//! things come from the previous manifest:
//! - `descriptions`, which are curated by hand and have no other source;
//! - `orientation`, as a cache so unchanged objects need not be re-probed.
//!
//! Layout: `{ "<category key>": [ ManifestEntry, ... ], ... }`, every configured
//! category present, entries sorted by name.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::contract::{Dimensions, MediaHandler, Store};
use crate::error::SyncError;
use crate::inventory::Inventory;
use crate::media::{file_name, file_stem, split_key, thumbnail_key, AssetKind, HandlerTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

impl Orientation {
    pub fn from_dimensions(dimensions: Dimensions) -> Self {
        if dimensions.width >= dimensions.height {
            Orientation::Horizontal
        } else {
            Orientation::Vertical
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub titles: BTreeMap<String, String>,
    pub orientation: Orientation,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptions: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    pub categories: BTreeMap<String, Vec<ManifestEntry>>,
}

impl Manifest {
    pub fn entry_count(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn find(&self, category: &str, name: &str) -> Option<&ManifestEntry> {
        self.categories.get(category)?.iter().find(|e| e.name == name)
    }

    /// Pretty JSON with non-ASCII characters kept as-is.
    pub fn to_json(&self) -> Result<String, SyncError> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }
}

/// The fields carried over from the previous manifest.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PreviousEntry {
    #[serde(default)]
    pub orientation: Option<Orientation>,
    #[serde(default)]
    pub descriptions: Option<Value>,
}

/// Previous manifest entries by (category key, name).
#[derive(Debug, Clone, Default)]
pub struct PreviousManifest {
    entries: HashMap<(String, String), PreviousEntry>,
}

impl PreviousManifest {
    pub fn get(&self, category: &str, name: &str) -> Option<&PreviousEntry> {
        self.entries.get(&(category.to_string(), name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse leniently: entries that do not look like manifest entries are
    /// dropped one by one instead of discarding the whole file.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let categories: BTreeMap<String, Vec<Value>> = serde_json::from_str(raw)?;
        let mut entries = HashMap::new();
        for (category, values) in categories {
            for value in values {
                let Some(name) = value.get("name").and_then(Value::as_str).map(str::to_string) else {
                    continue;
                };
                match serde_json::from_value::<PreviousEntry>(value) {
                    Ok(entry) => {
                        entries.insert((category.clone(), name), entry);
                    }
                    Err(e) => debug!(%category, %name, error = %e, "[MANIFEST] Ignoring unreadable previous entry"),
                }
            }
        }
        Ok(PreviousManifest { entries })
    }

    /// Load the manifest written by the last run. A missing file is an empty
    /// cache; an unreadable one is reported as a warning and ignored.
    pub fn load(path: &Path) -> (Self, Option<String>) {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "[MANIFEST] No previous manifest");
                return (Self::default(), None);
            }
            Err(e) => {
                let message = format!("could not read previous manifest {}: {e}", path.display());
                warn!("[MANIFEST][WARN] {message}");
                return (Self::default(), Some(message));
            }
        };
        match Self::parse(&raw) {
            Ok(previous) => {
                info!(path = %path.display(), entries = previous.len(), "[MANIFEST] Loaded previous manifest");
                (previous, None)
            }
            Err(e) => {
                let message = format!("ignoring corrupt previous manifest {}: {e}", path.display());
                warn!("[MANIFEST][WARN] {message}");
                (Self::default(), Some(message))
            }
        }
    }
}

/// Localised titles from a file name: the stem split on `_`, one part per
/// language in order, the last part reused when there are fewer parts than
/// languages, and `-` read as a space.
///
/// `Pôr-do-sol_Sunset_Atardecer.jpg` gives pt "Pôr do sol", en "Sunset",
/// es "Atardecer".
pub fn parse_titles(file_name: &str, languages: &[String]) -> BTreeMap<String, String> {
    let parts: Vec<&str> = file_stem(file_name).split('_').collect();
    languages
        .iter()
        .enumerate()
        .map(|(i, lang)| {
            let part = parts[i.min(parts.len() - 1)];
            (lang.clone(), part.replace('-', " "))
        })
        .collect()
}

/// Public URL of a destination key, each path segment percent-encoded.
pub fn public_url_for(public_url: &str, key: &str) -> String {
    let encoded: Vec<String> = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("{}/{}", public_url.trim_end_matches('/'), encoded.join("/"))
}

/// Inputs for one regeneration.
pub struct ManifestSources<'a> {
    /// Destination listing taken after publishing and pruning.
    pub inventory: &'a Inventory,
    pub previous: &'a PreviousManifest,
    /// Dimensions probed while publishing this run, by output key.
    pub probed: &'a HashMap<String, Dimensions>,
}

#[derive(Debug, Clone, Default)]
pub struct Regenerated {
    pub manifest: Manifest,
    pub warnings: Vec<String>,
}

/// Build a complete replacement manifest from the destination's final state.
///
/// Objects whose orientation is known neither from this run nor from the
/// previous manifest are fetched into scratch space and probed.
pub async fn regenerate(
    sources: ManifestSources<'_>,
    destination: &dyn Store,
    handler: &dyn MediaHandler,
    config: &SyncConfig,
) -> Regenerated {
    let table = HandlerTable::from_config(config);
    let mut categories: BTreeMap<String, Vec<ManifestEntry>> = config
        .categories
        .iter()
        .map(|c| (c.key.clone(), Vec::new()))
        .collect();
    let mut warnings = Vec::new();
    let mut to_probe: Vec<(String, String, String)> = Vec::new();

    for key in sources.inventory.keys() {
        let Some((folder, name)) = split_key(key) else {
            continue;
        };
        let Some(category) = config.category_for_folder(folder) else {
            continue;
        };
        let extension = file_name(key).rsplit_once('.').map(|(_, e)| e).unwrap_or("");
        let kind = table.kind_for(extension);

        let previous = sources.previous.get(&category.key, name);
        let orientation = match sources.probed.get(key) {
            Some(dims) => Orientation::from_dimensions(*dims),
            None => match previous.and_then(|p| p.orientation) {
                Some(orientation) => orientation,
                None => {
                    if kind != AssetKind::Passthrough {
                        to_probe.push((category.key.clone(), name.to_string(), key.clone()));
                    }
                    Orientation::Horizontal
                }
            },
        };

        let thumbnail_url = (kind == AssetKind::Video && !category.passthrough)
            .then(|| thumbnail_key(&config.thumbnails_prefix, key))
            .filter(|thumb| sources.inventory.contains_key(thumb))
            .map(|thumb| public_url_for(&config.public_url, &thumb));

        if let Some(bucket) = categories.get_mut(&category.key) {
            bucket.push(ManifestEntry {
                name: name.to_string(),
                titles: parse_titles(file_name(key), &config.languages),
                orientation,
                url: public_url_for(&config.public_url, key),
                thumbnail_url,
                descriptions: previous.and_then(|p| p.descriptions.clone()),
            });
        }
    }

    if !to_probe.is_empty() {
        info!(objects = to_probe.len(), "[MANIFEST] Probing objects with unknown orientation");
        let probed: Vec<(String, String, Result<Option<Dimensions>, String>)> = stream::iter(to_probe)
            .map(|(category, name, key)| async move {
                let result = probe_remote(destination, handler, &key).await;
                (category, name, result)
            })
            .buffer_unordered(config.workers.max(1))
            .collect()
            .await;

        for (category, name, result) in probed {
            match result {
                Ok(Some(dims)) => {
                    if let Some(entry) = categories
                        .get_mut(&category)
                        .and_then(|entries| entries.iter_mut().find(|e| e.name == name))
                    {
                        entry.orientation = Orientation::from_dimensions(dims);
                    }
                }
                Ok(None) => debug!(%category, %name, "[MANIFEST] No video stream, keeping horizontal"),
                Err(reason) => {
                    let message = format!("orientation unknown for {category}/{name}, using horizontal: {reason}");
                    warn!("[MANIFEST][WARN] {message}");
                    warnings.push(message);
                }
            }
        }
    }

    for entries in categories.values_mut() {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
    }
    let manifest = Manifest { categories };
    info!(entries = manifest.entry_count(), "[MANIFEST] Manifest regenerated");
    Regenerated { manifest, warnings }
}

async fn probe_remote(
    destination: &dyn Store,
    handler: &dyn MediaHandler,
    key: &str,
) -> Result<Option<Dimensions>, String> {
    let scratch = tempfile::Builder::new()
        .prefix("folio-probe-")
        .tempdir()
        .map_err(|e| format!("could not create scratch directory: {e}"))?;
    let local = scratch.path().join(file_name(key));
    destination
        .fetch(key, &local)
        .await
        .map_err(|e| format!("fetch failed: {e}"))?;
    let info = handler.probe(&local).await.map_err(|e| format!("probe failed: {e}"))?;
    Ok(info.dimensions)
}

/// Write the manifest atomically: a temp file next to the target, then rename.
pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<(), SyncError> {
    let json = manifest.to_json()?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let write_err = |source: std::io::Error| SyncError::Write {
        what: "manifest",
        path: path.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(json.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    info!(path = %path.display(), entries = manifest.entry_count(), "[MANIFEST] Manifest written");
    Ok(())
}
