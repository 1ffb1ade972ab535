//! Process-and-publish: fetch, transform, upload, clean up.
//!
//! Each item runs its whole sequence inside one future with its own scratch
//! directory. A bounded pool of such futures runs at once, and every future
//! returns an [`ItemOutcome`] that the coordinator aggregates; no state is
//! shared between items.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::contract::{MediaHandler, MediaInfo, PublishMetadata, Store};
use crate::detect::{ItemPlan, Plan, ProcessingDecision};
use crate::inventory::Inventory;
use crate::media::{thumbnail_timestamp, AssetKind, JPEG_EXTENSION};

#[derive(Debug, Clone, PartialEq)]
pub enum PublishStatus {
    /// Main asset left as it was.
    Unchanged,
    /// Main asset uploaded with this decision (`Create` or `Replace`).
    Published(ProcessingDecision),
    /// Nothing was uploaded for the main asset.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThumbnailStatus {
    NotApplicable,
    Unchanged,
    Uploaded,
    Failed(String),
}

/// What happened to one source item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOutcome {
    pub path: String,
    pub output_key: String,
    pub status: PublishStatus,
    pub thumbnail: ThumbnailStatus,
    /// Dimensions and duration probed from the original this run.
    pub media: Option<MediaInfo>,
    /// The source key was removed from the destination after a rename.
    pub stale_deleted: bool,
    pub warnings: Vec<String>,
}

impl ItemOutcome {
    fn new(item: &ItemPlan) -> Self {
        ItemOutcome {
            path: item.source.path.clone(),
            output_key: item.output_key.clone(),
            status: PublishStatus::Unchanged,
            thumbnail: match &item.thumbnail {
                Some(_) => ThumbnailStatus::Unchanged,
                None => ThumbnailStatus::NotApplicable,
            },
            media: None,
            stale_deleted: false,
            warnings: Vec::new(),
        }
    }

    fn warn(&mut self, message: String) {
        warn!(path = %self.path, "[PUBLISH][WARN] {message}");
        self.warnings.push(message);
    }

    fn fail(mut self, reason: String) -> Self {
        error!(path = %self.path, reason = %reason, "[PUBLISH][ERROR] Item failed, destination left unchanged");
        self.status = PublishStatus::Failed(reason);
        self
    }
}

/// Shared, read-only inputs for every item of a run.
pub struct Publisher<'a> {
    pub source: &'a dyn Store,
    pub destination: &'a dyn Store,
    pub handler: &'a dyn MediaHandler,
    pub inventory: &'a Inventory,
}

impl<'a> Publisher<'a> {
    /// Whether anything has to happen for this item: an upload, a thumbnail,
    /// or removal of the pre-rename key.
    pub fn needs_work(&self, item: &ItemPlan) -> bool {
        item.needs_work() || self.has_stale_key(item)
    }

    fn has_stale_key(&self, item: &ItemPlan) -> bool {
        item.renames_source() && self.inventory.contains_key(&item.source.path)
    }

    /// Publish every item that needs work, at most `workers` at a time.
    /// Outcomes come back sorted by source path.
    pub async fn publish_all(&self, plan: &Plan, workers: usize) -> Vec<ItemOutcome> {
        let pending: Vec<&ItemPlan> = plan.items.iter().filter(|item| self.needs_work(item)).collect();
        info!(
            pending = pending.len(),
            workers,
            "[PUBLISH] Publishing items"
        );

        let mut outcomes: Vec<ItemOutcome> = stream::iter(pending)
            .map(|item| self.publish_item(item))
            .buffer_unordered(workers.max(1))
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.path.cmp(&b.path));
        outcomes
    }

    /// Run one item's fetch, process, upload and cleanup sequence.
    pub async fn publish_item(&self, item: &ItemPlan) -> ItemOutcome {
        let mut outcome = ItemOutcome::new(item);
        let main_needed = item.decision != ProcessingDecision::Skip;
        let thumb_needed = item
            .thumbnail
            .as_ref()
            .is_some_and(|t| t.decision != ProcessingDecision::Skip);

        if main_needed || thumb_needed {
            // Dropping the TempDir removes it, on every return below.
            let scratch = match tempfile::Builder::new().prefix("folio-sync-").tempdir() {
                Ok(dir) => dir,
                Err(e) => return outcome.fail(format!("could not create scratch directory: {e}")),
            };

            let original = scratch.path().join(scratch_name("original", &item.source.extension));
            if let Err(e) = self.source.fetch(&item.source.path, &original).await {
                return outcome.fail(format!("fetch failed: {e}"));
            }
            debug!(path = %item.source.path, local = %original.display(), "[PUBLISH] Fetched original");

            if item.is_media {
                match self.handler.probe(&original).await {
                    Ok(info) => outcome.media = Some(info),
                    Err(e) => outcome.warn(format!("probe failed for {}: {e}", item.source.path)),
                }
            }

            let metadata = PublishMetadata::for_source(&item.source);

            if main_needed {
                let output = match self.process(item, &original, &scratch).await {
                    Ok(output) => output,
                    Err(reason) => return outcome.fail(reason),
                };
                if let Err(e) = self.destination.put(&output, &item.output_key, &metadata).await {
                    return outcome.fail(format!("upload to {} failed: {e}", item.output_key));
                }
                info!(
                    path = %item.source.path,
                    output_key = %item.output_key,
                    decision = %item.decision,
                    kind = %item.kind,
                    "[PUBLISH] Published"
                );
                outcome.status = PublishStatus::Published(item.decision);
            }

            if let Some(thumb) = item.thumbnail.as_ref().filter(|_| thumb_needed) {
                let at = thumbnail_timestamp(outcome.media.and_then(|m| m.duration));
                let local = scratch.path().join(format!("thumbnail.{JPEG_EXTENSION}"));
                let result = match self.handler.thumbnail(&original, at, &local).await {
                    Ok(()) => self
                        .destination
                        .put(&local, &thumb.key, &metadata)
                        .await
                        .map_err(|e| format!("thumbnail upload to {} failed: {e}", thumb.key)),
                    Err(e) => Err(format!("thumbnail extraction at {at:.2}s failed: {e}")),
                };
                match result {
                    Ok(()) => {
                        info!(path = %item.source.path, thumbnail_key = %thumb.key, at_secs = at, "[PUBLISH] Thumbnail published");
                        outcome.thumbnail = ThumbnailStatus::Uploaded;
                    }
                    Err(reason) => {
                        outcome.warn(format!("{}: {reason}", item.source.path));
                        outcome.thumbnail = ThumbnailStatus::Failed(reason);
                    }
                }
            }
        }

        if self.has_stale_key(item) {
            match self.destination.delete(&item.source.path).await {
                Ok(()) => {
                    info!(path = %item.source.path, output_key = %item.output_key, "[PUBLISH] Removed pre-rename key");
                    outcome.stale_deleted = true;
                }
                Err(e) => outcome.warn(format!("could not delete stale key {}: {e}", item.source.path)),
            }
        }

        outcome
    }

    /// Produce the file to upload for the main asset.
    async fn process(&self, item: &ItemPlan, original: &Path, scratch: &TempDir) -> Result<PathBuf, String> {
        match item.kind {
            AssetKind::Image => {
                let output = scratch.path().join(scratch_name("output", JPEG_EXTENSION));
                self.handler
                    .watermark_image(original, &output)
                    .await
                    .map_err(|e| format!("image watermark failed: {e}"))?;
                Ok(output)
            }
            AssetKind::Video => {
                let output = scratch.path().join(scratch_name("output", &item.source.extension));
                self.handler
                    .watermark_video(original, &output)
                    .await
                    .map_err(|e| format!("video watermark failed: {e}"))?;
                Ok(output)
            }
            AssetKind::Passthrough => Ok(original.to_path_buf()),
        }
    }
}

fn scratch_name(stem: &str, extension: &str) -> String {
    if extension.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{extension}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{Dimensions, MockMediaHandler, MockStore, SourceEntry};
    use crate::detect::ThumbnailPlan;
    use crate::error::{HandlerError, StoreError};

    fn video_plan(decision: ProcessingDecision, thumb: ProcessingDecision) -> ItemPlan {
        ItemPlan {
            source: SourceEntry {
                path: "Vídeos/Clip.mp4".into(),
                size: Some(10),
                modified_at: None,
                extension: "mp4".into(),
            },
            category_key: "videos".into(),
            kind: AssetKind::Video,
            is_media: true,
            output_key: "Vídeos/Clip.mp4".into(),
            decision,
            thumbnail: Some(ThumbnailPlan {
                key: "Thumbnails/Vídeos/Clip_thumb.jpg".into(),
                decision: thumb,
            }),
        }
    }

    fn fetching_source() -> MockStore {
        let mut source = MockStore::new();
        source
            .expect_fetch()
            .returning(|_, local| std::fs::write(local, b"original").map_err(StoreError::from));
        source
    }

    fn probing_handler() -> MockMediaHandler {
        let mut handler = MockMediaHandler::new();
        handler.expect_probe().returning(|_| {
            Ok(MediaInfo {
                dimensions: Some(Dimensions {
                    width: 1920,
                    height: 1080,
                }),
                duration: Some(20.0),
            })
        });
        handler
    }

    #[tokio::test]
    async fn thumbnail_failure_keeps_the_video() {
        let source = fetching_source();
        let mut handler = probing_handler();
        handler
            .expect_watermark_video()
            .times(1)
            .returning(|_, out| std::fs::write(out, b"wm").map_err(HandlerError::from));
        handler
            .expect_thumbnail()
            .withf(|_, at, _| (*at - 3.0).abs() < 1e-9)
            .times(1)
            .returning(|_, _, _| Err(HandlerError::Other("no frame".into())));
        let mut destination = MockStore::new();
        destination
            .expect_put()
            .withf(|_, key, meta| key == "Vídeos/Clip.mp4" && meta.source_size == Some(10))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let inventory = Inventory::new();
        let publisher = Publisher {
            source: &source,
            destination: &destination,
            handler: &handler,
            inventory: &inventory,
        };
        let outcome = publisher
            .publish_item(&video_plan(ProcessingDecision::Create, ProcessingDecision::Create))
            .await;

        assert_eq!(outcome.status, PublishStatus::Published(ProcessingDecision::Create));
        assert!(matches!(outcome.thumbnail, ThumbnailStatus::Failed(_)));
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test]
    async fn handler_failure_uploads_nothing() {
        let source = fetching_source();
        let mut handler = probing_handler();
        handler
            .expect_watermark_video()
            .returning(|_, _| Err(HandlerError::Other("encoder crashed".into())));
        handler.expect_thumbnail().times(0);
        let mut destination = MockStore::new();
        destination.expect_put().times(0);
        destination.expect_delete().times(0);

        let inventory = Inventory::new();
        let publisher = Publisher {
            source: &source,
            destination: &destination,
            handler: &handler,
            inventory: &inventory,
        };
        let outcome = publisher
            .publish_item(&video_plan(ProcessingDecision::Create, ProcessingDecision::Create))
            .await;
        assert!(matches!(outcome.status, PublishStatus::Failed(ref r) if r.contains("encoder crashed")));
    }

    #[tokio::test]
    async fn skipped_video_with_missing_thumbnail_only_uploads_the_thumbnail() {
        let source = fetching_source();
        let mut handler = probing_handler();
        handler.expect_watermark_video().times(0);
        handler
            .expect_thumbnail()
            .times(1)
            .returning(|_, _, out| std::fs::write(out, b"thumb").map_err(HandlerError::from));
        let mut destination = MockStore::new();
        destination
            .expect_put()
            .withf(|_, key, _| key == "Thumbnails/Vídeos/Clip_thumb.jpg")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let inventory = Inventory::new();
        let publisher = Publisher {
            source: &source,
            destination: &destination,
            handler: &handler,
            inventory: &inventory,
        };
        let outcome = publisher
            .publish_item(&video_plan(ProcessingDecision::Skip, ProcessingDecision::Create))
            .await;
        assert_eq!(outcome.status, PublishStatus::Unchanged);
        assert_eq!(outcome.thumbnail, ThumbnailStatus::Uploaded);
    }

    #[tokio::test]
    async fn fully_skipped_items_are_not_fetched() {
        let mut source = MockStore::new();
        source.expect_fetch().times(0);
        let handler = MockMediaHandler::new();
        let destination = MockStore::new();
        let inventory = Inventory::new();
        let publisher = Publisher {
            source: &source,
            destination: &destination,
            handler: &handler,
            inventory: &inventory,
        };
        let plan = Plan {
            items: vec![video_plan(ProcessingDecision::Skip, ProcessingDecision::Skip)],
            ..Plan::default()
        };
        assert!(publisher.publish_all(&plan, 2).await.is_empty());
    }
}
