//! High-level pipeline: inventory → change detection → publish → prune → manifest.
//!
//! This module ties the stages together for one run:
//!   - Lists the destination (what is already published) and the source (the originals)
//!   - Classifies every source item as skip / create / replace
//!   - Publishes the items that need work through a bounded worker pool
//!   - Prunes orphaned objects, then re-lists the destination and rebuilds the manifest
//!   - Writes the manifest and the failure log, and returns a [`SyncReport`]
//!
//! # Error Handling
//! Listing failures and failures to write the manifest or the failure log are
//! fatal and returned as [`SyncError`]. Everything that goes wrong for a single
//! item lands in the report instead and never stops the batch.
//!
//! # Navigation
//! - Main entrypoint: [`synchronise`]
//! - Read-only dry run: [`plan_only`]
//! - Manifest rebuild without processing: [`regenerate_manifest_only`]

use std::collections::HashMap;

use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::contract::{Dimensions, MediaHandler, Store};
use crate::detect::{self, Plan, ProcessingDecision};
use crate::error::SyncError;
use crate::exclude::ExcludeSet;
use crate::inventory::{list_sources, take_inventory, Inventory};
use crate::manifest::{self, ManifestSources, PreviousManifest};
use crate::media::HandlerTable;
use crate::prune;
use crate::publish::{ItemOutcome, PublishStatus, Publisher, ThumbnailStatus};
use crate::report::{write_failure_log, ItemFailure, SyncReport};

/// Run the full pipeline once.
///
/// Re-running with an unchanged source uploads nothing and rewrites an
/// identical manifest.
pub async fn synchronise(
    config: &SyncConfig,
    source: &dyn Store,
    destination: &dyn Store,
    handler: &dyn MediaHandler,
) -> Result<SyncReport, SyncError> {
    let run_id = Uuid::new_v4();
    let span = info_span!("sync_run", %run_id);
    async move {
        info!(
            source = %source.describe(),
            destination = %destination.describe(),
            "[SYNC] Starting synchronisation"
        );
        let plan_inputs = prepare(config, source, destination).await?;
        let mut report = SyncReport {
            skipped: plan_inputs.plan.count(ProcessingDecision::Skip),
            ignored: plan_inputs.plan.ignored.len(),
            failures: plan_inputs.plan.collisions.clone(),
            ..SyncReport::default()
        };

        let publisher = Publisher {
            source,
            destination,
            handler,
            inventory: &plan_inputs.inventory,
        };
        let outcomes = publisher.publish_all(&plan_inputs.plan, config.workers).await;
        let (probed, stale_deleted) = absorb_outcomes(&mut report, outcomes);

        if config.prune_orphans {
            let eligible = plan_inputs.plan.items.len() + plan_inputs.plan.collisions.len();
            // A failed item keeps whatever was published under its source path.
            let exempt: Vec<&str> = stale_deleted
                .iter()
                .map(String::as_str)
                .chain(report.failures.iter().map(|f| f.path.as_str()))
                .collect();
            let pruned = prune::prune(
                destination,
                &plan_inputs.inventory,
                &plan_inputs.plan,
                eligible,
                &exempt,
                config,
            )
            .await;
            report.pruned = pruned.deleted.len();
            report.warnings.extend(pruned.warnings);
        } else {
            info!("[PRUNE] Orphan pruning disabled");
        }

        let final_inventory = take_inventory(destination).await?;
        rebuild_manifest(config, &final_inventory, &probed, destination, handler, &mut report).await?;

        report.failures.sort_by(|a, b| a.path.cmp(&b.path));
        write_failure_log(&config.failure_log_path, &report.failures)?;

        report.trace_summary();
        Ok(report)
    }
    .instrument(span)
    .await
}

/// Inventory and change detection only. Mutates nothing, writes nothing.
pub async fn plan_only(config: &SyncConfig, source: &dyn Store, destination: &dyn Store) -> Result<Plan, SyncError> {
    let span = info_span!("sync_plan", run_id = %Uuid::new_v4());
    async move {
        let prepared = prepare(config, source, destination).await?;
        Ok(prepared.plan)
    }
    .instrument(span)
    .await
}

/// Rebuild the manifest from the destination as it is, without processing.
pub async fn regenerate_manifest_only(
    config: &SyncConfig,
    destination: &dyn Store,
    handler: &dyn MediaHandler,
) -> Result<SyncReport, SyncError> {
    let span = info_span!("sync_manifest", run_id = %Uuid::new_v4());
    async move {
        config.validate()?;
        config.trace_loaded();
        let inventory = take_inventory(destination).await?;
        let mut report = SyncReport::default();
        rebuild_manifest(config, &inventory, &HashMap::new(), destination, handler, &mut report).await?;
        Ok(report)
    }
    .instrument(span)
    .await
}

struct Prepared {
    inventory: Inventory,
    plan: Plan,
}

/// Validate, take both listings and classify. Nothing has been mutated when
/// this returns an error.
async fn prepare(config: &SyncConfig, source: &dyn Store, destination: &dyn Store) -> Result<Prepared, SyncError> {
    config.validate().map_err(|e| {
        error!(error = %e, "[SYNC][ERROR] Invalid configuration");
        e
    })?;
    config.trace_loaded();
    let excludes = ExcludeSet::new(&config.exclude)?;
    let table = HandlerTable::from_config(config);

    let inventory = take_inventory(destination).await?;
    let sources = list_sources(source).await?;
    let plan = detect::plan(&sources, &inventory, config, &table, &excludes);
    Ok(Prepared { inventory, plan })
}

/// Fold per-item outcomes into the report. Returns the dimensions probed
/// for successfully published outputs and the pre-rename keys removed.
fn absorb_outcomes(report: &mut SyncReport, outcomes: Vec<ItemOutcome>) -> (HashMap<String, Dimensions>, Vec<String>) {
    let mut probed = HashMap::new();
    let mut stale_deleted = Vec::new();

    for outcome in outcomes {
        match &outcome.status {
            PublishStatus::Published(ProcessingDecision::Create) => report.created += 1,
            PublishStatus::Published(_) => report.replaced += 1,
            PublishStatus::Unchanged => {}
            PublishStatus::Failed(reason) => report.failures.push(ItemFailure {
                path: outcome.path.clone(),
                reason: reason.clone(),
            }),
        }
        match &outcome.thumbnail {
            ThumbnailStatus::Uploaded => report.thumbnails_uploaded += 1,
            ThumbnailStatus::Failed(_) => report.thumbnails_failed += 1,
            ThumbnailStatus::NotApplicable | ThumbnailStatus::Unchanged => {}
        }
        if outcome.stale_deleted {
            report.stale_deleted += 1;
            stale_deleted.push(outcome.path.clone());
        }
        if !matches!(outcome.status, PublishStatus::Failed(_)) {
            if let Some(dims) = outcome.media.and_then(|m| m.dimensions) {
                probed.insert(outcome.output_key.clone(), dims);
            }
        }
        report.warnings.extend(outcome.warnings);
    }
    (probed, stale_deleted)
}

async fn rebuild_manifest(
    config: &SyncConfig,
    inventory: &Inventory,
    probed: &HashMap<String, Dimensions>,
    destination: &dyn Store,
    handler: &dyn MediaHandler,
    report: &mut SyncReport,
) -> Result<(), SyncError> {
    let (previous, warning) = PreviousManifest::load(&config.manifest_path);
    report.warnings.extend(warning);

    let regenerated = manifest::regenerate(
        ManifestSources {
            inventory,
            previous: &previous,
            probed,
        },
        destination,
        handler,
        config,
    )
    .await;
    report.warnings.extend(regenerated.warnings);
    report.manifest_entries = regenerated.manifest.entry_count();

    manifest::write_manifest(&config.manifest_path, &regenerated.manifest).map_err(|e| {
        error!(error = %e, "[MANIFEST][ERROR] Failed to write manifest");
        e
    })
}
