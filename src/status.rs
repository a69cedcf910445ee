//! Status assembler (C7, §4.5 "Status"): builds the snapshot the front end
//! polls from whatever the engine's components currently hold, without
//! itself performing any I/O.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::catalog::CatalogCache;
use crate::engine::collections::CollectionSync;
use crate::models::{CollectionStatus, CollectionSummary, StatusSnapshot, SyncState};

/// Assemble a `StatusSnapshot` from live state. `all_collections` is the
/// server's full collection list (cheap to keep fresh on a slow poll of its
/// own, independent of the sync loop); everything else comes from the
/// engine's already-resident state, so this never blocks on the network.
pub async fn assemble(
    connected: bool,
    auto_sync_enabled: bool,
    cache: &Arc<RwLock<CatalogCache>>,
    collection_sync: &Arc<CollectionSync>,
    all_collections: &[CollectionSummary],
    emulator_warnings: Vec<String>,
) -> StatusSnapshot {
    let cache = cache.read().await;
    let selected = collection_sync.selected_collections().await;
    let progress = collection_sync.download_progress_snapshot().await;

    let mut collections = Vec::with_capacity(all_collections.len());
    for collection in all_collections {
        let is_auto_sync = selected.contains(&collection.name);
        let last_removal = collection_sync.last_removal(&collection.name).await;
        let cached_count = collection_sync.cached_rom_count(&collection.name).await;

        let status = if let Some(p) = progress.get(&collection.name) {
            CollectionStatus {
                name: collection.name.clone(),
                auto_sync: is_auto_sync,
                sync_state: SyncState::Syncing,
                downloaded: p.downloaded,
                total: p.total,
                speed_bytes_per_sec: Some(p.speed_bytes_per_sec),
                downloaded_pct: Some(p.downloaded_pct),
                last_removal,
            }
        } else if is_auto_sync {
            let total = cached_count.unwrap_or(0) as u64;
            CollectionStatus {
                name: collection.name.clone(),
                auto_sync: true,
                sync_state: if cached_count.is_some() {
                    SyncState::Synced
                } else {
                    SyncState::NotSynced
                },
                downloaded: total,
                total,
                speed_bytes_per_sec: None,
                downloaded_pct: None,
                last_removal,
            }
        } else {
            CollectionStatus {
                name: collection.name.clone(),
                auto_sync: false,
                sync_state: SyncState::NotSynced,
                downloaded: 0,
                total: cached_count.unwrap_or(0) as u64,
                speed_bytes_per_sec: None,
                downloaded_pct: None,
                last_removal,
            }
        };
        collections.push(status);
    }

    StatusSnapshot {
        connected,
        auto_sync_enabled,
        game_count: cache.games().len() as u64,
        collections,
        emulator_warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogClient;
    use crate::host_hooks::HeadlessHooks;
    use crate::models::ConflictPolicy;
    use std::collections::HashSet;

    #[tokio::test]
    async fn unselected_collection_reports_not_synced() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(RwLock::new(CatalogCache::load(dir.path()).unwrap()));
        let client = Arc::new(CatalogClient::new("http://localhost".to_string()).unwrap());
        let hooks = Arc::new(HeadlessHooks::new(None, ConflictPolicy::Smart));
        let sync = CollectionSync::new(
            client,
            cache.clone(),
            hooks,
            dir.path().to_path_buf(),
            HashSet::new(),
            true,
            false,
        );

        let collections = vec![CollectionSummary { id: 1, name: "Favorites".to_string() }];
        let snapshot = assemble(true, true, &cache, &sync, &collections, vec![]).await;

        assert_eq!(snapshot.collections.len(), 1);
        assert_eq!(snapshot.collections[0].sync_state, SyncState::NotSynced);
        assert!(!snapshot.collections[0].auto_sync);
    }
}
