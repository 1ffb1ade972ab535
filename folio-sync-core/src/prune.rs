//! Orphan pruning: remove published objects no source item maps to anymore.

use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::contract::Store;
use crate::detect::Plan;
use crate::inventory::Inventory;
use crate::media::split_key;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneOutcome {
    pub deleted: Vec<String>,
    pub warnings: Vec<String>,
}

/// Whether `key` lies in a folder this pipeline owns.
pub fn is_managed(key: &str, config: &SyncConfig) -> bool {
    match split_key(key) {
        Some((folder, _)) => folder == config.thumbnails_prefix || config.category_for_folder(folder).is_some(),
        None => false,
    }
}

/// Destination keys in the managed namespace that no planned item expects.
pub fn orphans<'a>(inventory: &'a Inventory, plan: &Plan, config: &SyncConfig) -> Vec<&'a str> {
    let expected = plan.expected_keys();
    inventory
        .keys()
        .map(String::as_str)
        .filter(|key| is_managed(key, config) && !expected.contains(key))
        .collect()
}

/// Delete orphans from the destination.
///
/// `inventory` is the destination as it was before publishing. `exempt` holds
/// keys that must survive this run: pre-rename keys a rename already removed,
/// and the source paths of items that failed, whose old published object is
/// still the live version.
pub async fn prune(
    destination: &dyn Store,
    inventory: &Inventory,
    plan: &Plan,
    eligible_sources: usize,
    exempt: &[&str],
    config: &SyncConfig,
) -> PruneOutcome {
    let mut outcome = PruneOutcome::default();
    let candidates: Vec<&str> = orphans(inventory, plan, config)
        .into_iter()
        .filter(|key| !exempt.contains(key))
        .collect();

    if candidates.is_empty() {
        info!("[PRUNE] No orphans");
        return outcome;
    }

    // An empty source next to a populated destination is more likely a
    // broken mount or a wrong remote than a deliberate wipe.
    let managed = inventory.keys().filter(|k| is_managed(k, config)).count();
    if eligible_sources == 0 && managed > 0 {
        let message = format!(
            "source has no eligible items but destination holds {managed} managed objects, not pruning"
        );
        warn!("[PRUNE][WARN] {message}");
        outcome.warnings.push(message);
        return outcome;
    }

    info!(orphans = candidates.len(), "[PRUNE] Deleting orphans");
    for key in candidates {
        match destination.delete(key).await {
            Ok(()) => {
                info!(key, "[PRUNE] Deleted orphan");
                outcome.deleted.push(key.to_string());
            }
            Err(e) => {
                let message = format!("could not delete orphan {key}: {e}");
                warn!("[PRUNE][WARN] {message}");
                outcome.warnings.push(message);
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Category;
    use crate::contract::{MockStore, RemoteEntry, SourceEntry};
    use crate::detect::{ItemPlan, ProcessingDecision};
    use crate::error::StoreError;
    use crate::media::AssetKind;

    fn config() -> SyncConfig {
        SyncConfig::new(
            "https://cdn.example.com",
            vec![Category {
                folder: "Fotografias".into(),
                key: "fotografias".into(),
                passthrough: false,
            }],
        )
    }

    fn inventory(keys: &[&str]) -> Inventory {
        keys.iter()
            .map(|k| {
                (
                    k.to_string(),
                    RemoteEntry {
                        path: k.to_string(),
                        size: Some(1),
                        modified_at: None,
                        source_size: None,
                    },
                )
            })
            .collect()
    }

    fn plan_for(paths: &[&str]) -> Plan {
        Plan {
            items: paths
                .iter()
                .map(|p| ItemPlan {
                    source: SourceEntry {
                        path: p.to_string(),
                        size: Some(1),
                        modified_at: None,
                        extension: "jpg".into(),
                    },
                    category_key: "fotografias".into(),
                    kind: AssetKind::Image,
                    is_media: true,
                    output_key: p.to_string(),
                    decision: ProcessingDecision::Skip,
                    thumbnail: None,
                })
                .collect(),
            ..Plan::default()
        }
    }

    #[test]
    fn only_managed_keys_are_orphans() {
        let config = config();
        let inv = inventory(&[
            "Fotografias/keep.jpg",
            "Fotografias/gone.jpg",
            "Thumbnails/Vídeos/old_thumb.jpg",
            "index.html",
            "Other/x.jpg",
        ]);
        let found = orphans(&inv, &plan_for(&["Fotografias/keep.jpg"]), &config);
        assert_eq!(found, vec!["Fotografias/gone.jpg", "Thumbnails/Vídeos/old_thumb.jpg"]);
    }

    #[tokio::test]
    async fn empty_source_never_prunes_a_populated_destination() {
        let mut store = MockStore::new();
        store.expect_delete().times(0);
        let inv = inventory(&["Fotografias/a.jpg"]);
        let outcome = prune(&store, &inv, &Plan::default(), 0, &[], &config()).await;
        assert!(outcome.deleted.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test]
    async fn delete_failures_are_warnings() {
        let mut store = MockStore::new();
        store
            .expect_delete()
            .withf(|key| key == "Fotografias/gone.jpg")
            .times(1)
            .returning(|_| Err(StoreError::Other("throttled".into())));
        let inv = inventory(&["Fotografias/keep.jpg", "Fotografias/gone.jpg", "Fotografias/renamed.png"]);
        let outcome = prune(
            &store,
            &inv,
            &plan_for(&["Fotografias/keep.jpg"]),
            1,
            &["Fotografias/renamed.png"],
            &config(),
        )
        .await;
        assert!(outcome.deleted.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test]
    async fn exempt_keys_survive_even_as_orphans() {
        let mut store = MockStore::new();
        store
            .expect_delete()
            .withf(|key| key == "Fotografias/gone.jpg")
            .times(1)
            .returning(|_| Ok(()));
        let inv = inventory(&["Fotografias/gone.jpg", "Fotografias/failed.png"]);
        let outcome = prune(
            &store,
            &inv,
            &plan_for(&["Fotografias/failed.jpg"]),
            1,
            &["Fotografias/failed.png"],
            &config(),
        )
        .await;
        assert_eq!(outcome.deleted, vec!["Fotografias/gone.jpg".to_string()]);
        assert!(outcome.warnings.is_empty());
    }
}
