///
/// This module implements the CLI interface for folio-sync: command parsing, wiring of
/// the rclone stores and the ffmpeg handler, and user-visible output.
///
/// All pipeline logic lives in the [`folio-sync-core`] crate. This module is strictly
/// CLI glue.
///
/// ## Commands
/// - `sync`: full run (inventory, detect, publish, prune, manifest, failure log)
/// - `plan`: inventory and change detection only, prints every decision
/// - `manifest`: rebuild the manifest from the destination without processing
///
/// ## Exit codes
/// Fatal errors (listing failures, invalid config, manifest or failure-log write
/// failures) exit non-zero. Items that failed to publish do not: they are listed in
/// the summary and the failure log.
///
/// [`folio-sync-core`]: ../../folio-sync-core/
use crate::load_config::load_config;
use anyhow::Result;
use clap::{Parser, Subcommand};
use folio_sync_core::detect::Plan;
use folio_sync_core::ffmpeg::FfmpegHandler;
use folio_sync_core::rclone::RcloneStore;
use folio_sync_core::synchronise::{plan_only, regenerate_manifest_only, synchronise};
use serde::Serialize;
use std::path::PathBuf;

/// CLI for folio-sync: watermark portfolio media and publish it incrementally.
#[derive(Parser)]
#[clap(
    name = "folio-sync",
    version,
    about = "Incrementally watermark and publish portfolio media from a drive to a public bucket"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish everything that changed and rebuild the manifest
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Show what a sync would do, without changing anything
    Plan {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Print the plan as JSON
        #[clap(long)]
        json: bool,
    },
    /// Rebuild the manifest from the destination only
    Manifest {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

#[derive(Serialize)]
struct PlanLine<'a> {
    path: &'a str,
    output_key: &'a str,
    kind: String,
    decision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail: Option<String>,
}

fn render_plan(plan: &Plan, json: bool) -> Result<String> {
    let lines: Vec<PlanLine<'_>> = plan
        .items
        .iter()
        .map(|item| PlanLine {
            path: &item.source.path,
            output_key: &item.output_key,
            kind: item.kind.to_string(),
            decision: item.decision.to_string(),
            thumbnail: item.thumbnail.as_ref().map(|t| t.decision.to_string()),
        })
        .collect();
    if json {
        return Ok(serde_json::to_string_pretty(&lines)?);
    }
    let mut out = String::new();
    for line in &lines {
        out.push_str(&format!("{:<8} {} -> {}", line.decision, line.path, line.output_key));
        if let Some(thumb) = &line.thumbnail {
            out.push_str(&format!(" (thumbnail: {thumb})"));
        }
        out.push('\n');
    }
    for failure in &plan.collisions {
        out.push_str(&format!("{:<8} {}: {}\n", "fail", failure.path, failure.reason));
    }
    out.push_str(&format!("{} items, {} ignored\n", plan.items.len(), plan.ignored.len()));
    Ok(out)
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config } => {
            let config = load_config(config)?;
            tracing::info!(command = "sync", "Starting synchronisation");
            let timeout = config.sync.command_timeout();
            let source = RcloneStore::new(config.source.clone(), timeout);
            let destination = RcloneStore::new(config.destination.clone(), timeout);
            let handler = FfmpegHandler::new(config.sync.watermark.clone(), timeout);
            match synchronise(&config.sync, &source, &destination, &handler).await {
                Ok(report) => {
                    print!("{report}");
                    tracing::info!(command = "sync", failed = report.failed(), "Synchronisation complete");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "sync", error = %e, "Synchronisation failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
        Commands::Plan { config, json } => {
            let config = load_config(config)?;
            tracing::info!(command = "plan", "Computing plan");
            let timeout = config.sync.command_timeout();
            let source = RcloneStore::new(config.source.clone(), timeout);
            let destination = RcloneStore::new(config.destination.clone(), timeout);
            let plan = plan_only(&config.sync, &source, &destination).await.map_err(|e| {
                tracing::error!(command = "plan", error = %e, "Planning failed");
                anyhow::Error::new(e)
            })?;
            print!("{}", render_plan(&plan, json)?);
            Ok(())
        }
        Commands::Manifest { config } => {
            let config = load_config(config)?;
            tracing::info!(command = "manifest", "Rebuilding manifest");
            let timeout = config.sync.command_timeout();
            let destination = RcloneStore::new(config.destination.clone(), timeout);
            let handler = FfmpegHandler::new(config.sync.watermark.clone(), timeout);
            let report = regenerate_manifest_only(&config.sync, &destination, &handler)
                .await
                .map_err(|e| {
                    tracing::error!(command = "manifest", error = %e, "Manifest rebuild failed");
                    anyhow::Error::new(e)
                })?;
            println!(
                "Manifest written to {} ({} entries)",
                config.sync.manifest_path.display(),
                report.manifest_entries
            );
            for warning in &report.warnings {
                println!("  warning: {warning}");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_sync_core::contract::SourceEntry;
    use folio_sync_core::detect::{ItemPlan, ProcessingDecision, ThumbnailPlan};
    use folio_sync_core::media::AssetKind;

    fn plan() -> Plan {
        Plan {
            items: vec![ItemPlan {
                source: SourceEntry {
                    path: "Vídeos/Clip.mp4".into(),
                    size: Some(1),
                    modified_at: None,
                    extension: "mp4".into(),
                },
                category_key: "videos".into(),
                kind: AssetKind::Video,
                is_media: true,
                output_key: "Vídeos/Clip.mp4".into(),
                decision: ProcessingDecision::Skip,
                thumbnail: Some(ThumbnailPlan {
                    key: "Thumbnails/Vídeos/Clip_thumb.jpg".into(),
                    decision: ProcessingDecision::Create,
                }),
            }],
            collisions: vec![],
            ignored: vec!["stray.txt".into()],
        }
    }

    #[test]
    fn plan_renders_as_text() {
        let text = render_plan(&plan(), false).unwrap();
        assert!(text.contains("skip     Vídeos/Clip.mp4 -> Vídeos/Clip.mp4 (thumbnail: create)"));
        assert!(text.contains("1 items, 1 ignored"));
    }

    #[test]
    fn plan_renders_as_json() {
        let json: serde_json::Value = serde_json::from_str(&render_plan(&plan(), true).unwrap()).unwrap();
        assert_eq!(json[0]["decision"], "skip");
        assert_eq!(json[0]["thumbnail"], "create");
        assert_eq!(json[0]["kind"], "video");
    }
}
