//! Stateful fixtures shared by the pipeline integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

use folio_sync_core::config::{Category, SyncConfig};
use folio_sync_core::contract::{Dimensions, MediaHandler, MediaInfo, ObjectInfo, PublishMetadata, Store};
use folio_sync_core::error::{HandlerError, StoreError};

/// Marker bytes that make [`FakeHandler::probe`] report a portrait frame.
pub const PORTRAIT: &[u8] = b"PORTRAIT";
/// Marker bytes that make the fake watermarking fail.
pub const CORRUPT: &[u8] = b"CORRUPT";

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub modified_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

/// An in-memory [`Store`] that behaves like an rclone remote.
#[derive(Clone, Default)]
pub struct MemoryStore {
    name: String,
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    puts: Arc<AtomicUsize>,
    deletes: Arc<AtomicUsize>,
    /// Listing reports "not found" while the store holds nothing.
    missing_when_empty: bool,
    failing_fetches: Arc<Mutex<HashSet<String>>>,
    failing_deletes: Arc<Mutex<HashSet<String>>>,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        MemoryStore {
            name: name.to_string(),
            ..MemoryStore::default()
        }
    }

    pub fn missing(name: &str) -> Self {
        MemoryStore {
            missing_when_empty: true,
            ..MemoryStore::new(name)
        }
    }

    pub fn insert(&self, key: &str, bytes: &[u8]) {
        self.insert_at(key, bytes, Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
    }

    pub fn insert_at(&self, key: &str, bytes: &[u8], modified_at: DateTime<Utc>) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                modified_at,
                metadata: BTreeMap::new(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn fail_fetch_of(&self, key: &str) {
        self.failing_fetches.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_delete_of(&self, key: &str) {
        self.failing_deletes.lock().unwrap().insert(key.to_string());
    }

    pub fn heal_deletes(&self) {
        self.failing_deletes.lock().unwrap().clear();
    }

    /// Digest over every key, its bytes and its metadata.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, object) in self.objects.lock().unwrap().iter() {
            hasher.update(key.as_bytes());
            hasher.update([0]);
            hasher.update(&object.bytes);
            for (k, v) in &object.metadata {
                hasher.update(k.as_bytes());
                hasher.update(v.as_bytes());
            }
            hasher.update([0xff]);
        }
        format!("{:x}", hasher.finalize())
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }

    async fn list(&self) -> Result<Vec<ObjectInfo>, StoreError> {
        let objects = self.objects.lock().unwrap();
        if self.missing_when_empty && objects.is_empty() {
            return Err(StoreError::NotFound(self.describe()));
        }
        Ok(objects
            .iter()
            .map(|(key, object)| ObjectInfo {
                path: key.clone(),
                size: Some(object.bytes.len() as u64),
                modified_at: Some(object.modified_at),
                metadata: object.metadata.clone(),
            })
            .collect())
    }

    async fn fetch(&self, key: &str, local: &Path) -> Result<(), StoreError> {
        if self.failing_fetches.lock().unwrap().contains(key) {
            return Err(StoreError::Other(format!("injected fetch failure for {key}")));
        }
        let bytes = match self.objects.lock().unwrap().get(key) {
            Some(object) => object.bytes.clone(),
            None => return Err(StoreError::NotFound(key.to_string())),
        };
        std::fs::write(local, bytes)?;
        Ok(())
    }

    async fn put(&self, local: &Path, key: &str, metadata: &PublishMetadata) -> Result<(), StoreError> {
        let bytes = std::fs::read(local)?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                bytes,
                modified_at: Utc::now(),
                metadata: metadata.to_pairs().into_iter().collect(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(StoreError::Other(format!("injected delete failure for {key}")));
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Deterministic stand-in for ffmpeg: prefixes bytes instead of encoding.
#[derive(Default)]
pub struct FakeHandler {
    pub fail_thumbnails: AtomicBool,
    pub thumbnail_times: Mutex<Vec<f64>>,
    pub probes: AtomicUsize,
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn transform(input: &Path, output: &Path, prefix: &[u8]) -> Result<(), HandlerError> {
    let bytes = std::fs::read(input)?;
    if contains(&bytes, CORRUPT) {
        return Err(HandlerError::Other("invalid data found when processing input".into()));
    }
    let mut out = prefix.to_vec();
    out.extend_from_slice(&bytes);
    std::fs::write(output, out)?;
    Ok(())
}

#[async_trait]
impl MediaHandler for FakeHandler {
    async fn watermark_image(&self, input: &Path, output: &Path) -> Result<(), HandlerError> {
        transform(input, output, b"WM-JPEG:")
    }

    async fn watermark_video(&self, input: &Path, output: &Path) -> Result<(), HandlerError> {
        transform(input, output, b"WM-VIDEO:")
    }

    async fn thumbnail(&self, video: &Path, at_secs: f64, output: &Path) -> Result<(), HandlerError> {
        if self.fail_thumbnails.load(Ordering::SeqCst) {
            return Err(HandlerError::Other("no frame extracted".into()));
        }
        self.thumbnail_times.lock().unwrap().push(at_secs);
        transform(video, output, format!("THUMB@{at_secs:.3}:").as_bytes())
    }

    async fn probe(&self, input: &Path) -> Result<MediaInfo, HandlerError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let bytes = std::fs::read(input)?;
        let dimensions = if contains(&bytes, PORTRAIT) {
            Dimensions {
                width: 1080,
                height: 1920,
            }
        } else {
            Dimensions {
                width: 1920,
                height: 1080,
            }
        };
        Ok(MediaInfo {
            dimensions: Some(dimensions),
            duration: Some(10.0),
        })
    }
}

/// Config with photo, video and a passthrough carousel category, writing its
/// manifest and failure log under `dir`.
pub fn config(dir: &Path) -> SyncConfig {
    let mut config = SyncConfig::new(
        "https://cdn.example.com",
        vec![
            Category {
                folder: "Fotografias".into(),
                key: "fotografias".into(),
                passthrough: false,
            },
            Category {
                folder: "Vídeos".into(),
                key: "videos".into(),
                passthrough: false,
            },
            Category {
                folder: "Melhores".into(),
                key: "carousel".into(),
                passthrough: true,
            },
        ],
    );
    config.manifest_path = dir.join("data.json");
    config.failure_log_path = dir.join("failed_files.log");
    config
}

/// `n` bytes of filler starting with `tag`.
pub fn bytes(tag: &[u8], n: usize) -> Vec<u8> {
    let mut out = tag.to_vec();
    out.resize(n.max(tag.len()), b'.');
    out
}
