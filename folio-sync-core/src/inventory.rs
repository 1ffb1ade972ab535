//! Remote inventory and source listing.

use std::collections::BTreeMap;

use tracing::{error, info, warn};

use crate::contract::{PublishMetadata, RemoteEntry, SourceEntry, Store};
use crate::error::{StoreError, SyncError};

/// Destination objects by relative key.
pub type Inventory = BTreeMap<String, RemoteEntry>;

/// List the destination store.
///
/// A destination that does not exist yet is an empty inventory. Every other
/// listing failure is fatal: treating it as empty would reprocess everything.
pub async fn take_inventory(store: &dyn Store) -> Result<Inventory, SyncError> {
    let objects = match store.list().await {
        Ok(objects) => objects,
        Err(StoreError::NotFound(what)) => {
            info!(store = %store.describe(), %what, "[INVENTORY] Destination does not exist yet, starting empty");
            return Ok(Inventory::new());
        }
        Err(e) => {
            error!(store = %store.describe(), error = %e, "[INVENTORY][ERROR] Destination listing failed");
            return Err(SyncError::Inventory {
                store: store.describe(),
                source: e,
            });
        }
    };

    let mut inventory = Inventory::new();
    for object in objects {
        let entry = RemoteEntry {
            source_size: PublishMetadata::from_map(&object.metadata).source_size,
            path: object.path,
            size: object.size,
            modified_at: object.modified_at,
        };
        if let Some(previous) = inventory.insert(entry.path.clone(), entry) {
            warn!(path = %previous.path, "[INVENTORY] Duplicate key in destination listing, keeping the last one");
        }
    }

    info!(store = %store.describe(), objects = inventory.len(), "[INVENTORY] Destination inventory taken");
    Ok(inventory)
}

/// List the source store. Any failure, including a missing source, is fatal.
pub async fn list_sources(store: &dyn Store) -> Result<Vec<SourceEntry>, SyncError> {
    let objects = store.list().await.map_err(|e| {
        error!(store = %store.describe(), error = %e, "[INVENTORY][ERROR] Source listing failed");
        SyncError::SourceListing {
            store: store.describe(),
            source: e,
        }
    })?;
    let sources: Vec<SourceEntry> = objects.into_iter().map(SourceEntry::from_object).collect();
    info!(store = %store.describe(), items = sources.len(), "[INVENTORY] Source listed");
    Ok(sources)
}
