//! Change detection: classify every source item against the destination inventory.
//!
//! The only comparator is byte size. A destination object matches a source item
//! when it sits at the item's *derived* output key and its recorded source size
//! equals the item's size. Modification times are never consulted.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::contract::{RemoteEntry, SourceEntry};
use crate::exclude::ExcludeSet;
use crate::inventory::Inventory;
use crate::media::{output_key, split_key, thumbnail_key, AssetKind, HandlerTable};
use crate::report::ItemFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingDecision {
    Skip,
    Create,
    Replace,
}

impl fmt::Display for ProcessingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingDecision::Skip => write!(f, "skip"),
            ProcessingDecision::Create => write!(f, "create"),
            ProcessingDecision::Replace => write!(f, "replace"),
        }
    }
}

/// Classify one source size against the object at its output key.
///
/// An unknown size on either side never skips.
pub fn decide(remote: Option<&RemoteEntry>, source_size: Option<u64>) -> ProcessingDecision {
    match (remote, source_size) {
        (None, _) => ProcessingDecision::Create,
        (Some(existing), Some(size)) if existing.recorded_source_size() == Some(size) => ProcessingDecision::Skip,
        (Some(_), _) => ProcessingDecision::Replace,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailPlan {
    pub key: String,
    pub decision: ProcessingDecision,
}

/// Everything the publisher needs to know about one source item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemPlan {
    pub source: SourceEntry,
    pub category_key: String,
    pub kind: AssetKind,
    /// Whether the original has probeable dimensions, even when copied as-is.
    pub is_media: bool,
    pub output_key: String,
    pub decision: ProcessingDecision,
    pub thumbnail: Option<ThumbnailPlan>,
}

impl ItemPlan {
    pub fn needs_work(&self) -> bool {
        self.decision != ProcessingDecision::Skip
            || self
                .thumbnail
                .as_ref()
                .is_some_and(|t| t.decision != ProcessingDecision::Skip)
    }

    /// Output lands on a different key than the source, e.g. `a.png` -> `a.jpg`.
    pub fn renames_source(&self) -> bool {
        self.output_key != self.source.path
    }
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub items: Vec<ItemPlan>,
    /// Items whose output key was already claimed by an earlier item.
    pub collisions: Vec<ItemFailure>,
    /// Items outside every category, or excluded by pattern.
    pub ignored: Vec<String>,
}

impl Plan {
    pub fn count(&self, decision: ProcessingDecision) -> usize {
        self.items.iter().filter(|i| i.decision == decision).count()
    }

    /// Every destination key the current source set maps to.
    pub fn expected_keys(&self) -> HashSet<&str> {
        let mut keys = HashSet::new();
        for item in &self.items {
            keys.insert(item.output_key.as_str());
            if let Some(thumb) = &item.thumbnail {
                keys.insert(thumb.key.as_str());
            }
        }
        keys
    }
}

/// Build the per-item plan. Items are visited in path order, so the outcome
/// does not depend on listing order.
pub fn plan(
    sources: &[SourceEntry],
    inventory: &Inventory,
    config: &SyncConfig,
    table: &HandlerTable,
    excludes: &ExcludeSet,
) -> Plan {
    let mut ordered: Vec<&SourceEntry> = sources.iter().collect();
    ordered.sort_by(|a, b| a.path.cmp(&b.path));

    let mut result = Plan::default();
    let mut claimed: HashSet<String> = HashSet::new();

    for source in ordered {
        let Some(category) = split_key(&source.path).and_then(|(folder, _)| config.category_for_folder(folder))
        else {
            debug!(path = %source.path, "[DETECT] Outside every category, ignoring");
            result.ignored.push(source.path.clone());
            continue;
        };
        if excludes.is_excluded(&source.path) {
            debug!(path = %source.path, "[DETECT] Excluded by pattern");
            result.ignored.push(source.path.clone());
            continue;
        }

        let by_extension = table.kind_for(&source.extension);
        let kind = if category.passthrough {
            AssetKind::Passthrough
        } else {
            by_extension
        };
        let key = output_key(kind, &source.path);

        if !claimed.insert(key.clone()) {
            warn!(path = %source.path, output_key = %key, "[DETECT] Output key already claimed by another source item");
            result.collisions.push(ItemFailure {
                path: source.path.clone(),
                reason: format!("output key collision on {key}"),
            });
            continue;
        }

        if source.size.is_none() {
            warn!(path = %source.path, "[DETECT] Source size unknown, processing optimistically");
        }
        let decision = decide(inventory.get(&key), source.size);

        let thumbnail = (kind == AssetKind::Video).then(|| {
            let thumb_key = thumbnail_key(&config.thumbnails_prefix, &source.path);
            let thumb_decision = decide(inventory.get(&thumb_key), source.size);
            ThumbnailPlan {
                key: thumb_key,
                decision: thumb_decision,
            }
        });

        debug!(
            path = %source.path,
            output_key = %key,
            %kind,
            %decision,
            thumbnail = ?thumbnail.as_ref().map(|t| t.decision),
            "[DETECT] Classified source item"
        );

        result.items.push(ItemPlan {
            source: source.clone(),
            category_key: category.key.clone(),
            kind,
            is_media: by_extension != AssetKind::Passthrough,
            output_key: key,
            decision,
            thumbnail,
        });
    }

    info!(
        items = result.items.len(),
        skip = result.count(ProcessingDecision::Skip),
        create = result.count(ProcessingDecision::Create),
        replace = result.count(ProcessingDecision::Replace),
        collisions = result.collisions.len(),
        ignored = result.ignored.len(),
        "[DETECT] Change detection complete"
    );
    result
}
