//! Collection sync loop (C6, §4.5): a periodic diff between the server's
//! collection membership and the local cache, triggering downloads of
//! added ROMs (with live per-chunk progress) and optional deletion of
//! removed ROMs.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::catalog::client::{CatalogClient, DownloadOutcome};
use crate::catalog::CatalogCache;
use crate::host_hooks::HostHooks;
use crate::models::{CollectionSummary, DownloadProgress, RemovalEvent, RomEntry};

/// Shared collection-sync state, read by the status assembler (C7) and
/// mutated by exactly this component's own threads (§5).
pub struct CollectionSync {
    client: Arc<CatalogClient>,
    cache: Arc<RwLock<CatalogCache>>,
    hooks: Arc<dyn HostHooks>,
    rom_directory: PathBuf,
    auto_download: bool,
    auto_delete: bool,
    selected: RwLock<HashSet<String>>,
    collection_caches: Mutex<HashMap<String, HashSet<i64>>>,
    download_progress: Mutex<HashMap<String, DownloadProgress>>,
    last_removals: Mutex<HashMap<String, RemovalEvent>>,
}

impl CollectionSync {
    pub fn new(
        client: Arc<CatalogClient>,
        cache: Arc<RwLock<CatalogCache>>,
        hooks: Arc<dyn HostHooks>,
        rom_directory: PathBuf,
        selected: HashSet<String>,
        auto_download: bool,
        auto_delete: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            cache,
            hooks,
            rom_directory,
            auto_download,
            auto_delete,
            selected: RwLock::new(selected),
            collection_caches: Mutex::new(HashMap::new()),
            download_progress: Mutex::new(HashMap::new()),
            last_removals: Mutex::new(HashMap::new()),
        })
    }

    pub async fn selected_collections(&self) -> HashSet<String> {
        self.selected.read().await.clone()
    }

    pub async fn download_progress_snapshot(&self) -> HashMap<String, DownloadProgress> {
        self.download_progress.lock().await.clone()
    }

    pub async fn cached_rom_count(&self, collection_name: &str) -> Option<usize> {
        self.collection_caches
            .lock()
            .await
            .get(collection_name)
            .map(HashSet::len)
    }

    pub async fn last_removal(&self, collection_name: &str) -> Option<RemovalEvent> {
        self.last_removals.lock().await.get(collection_name).cloned()
    }

    /// First-run catch-up (§4.5 "Initialization"): fetch membership for
    /// every selected collection, cache the ID set, and download every ROM
    /// currently in it whose local file is absent.
    pub async fn initialize(&self) {
        let selected = self.selected_collections().await;
        let all = match self.client.get_collections().await {
            Ok(c) => c,
            Err(e) => {
                self.hooks.log(&format!("collection sync: could not list collections: {e}"));
                return;
            }
        };
        for collection in &all {
            if !selected.contains(&collection.name) {
                continue;
            }
            self.init_collection(collection).await;
        }
    }

    /// Initialize (or re-initialize) a single collection: runs in its own
    /// task when a collection is newly selected at runtime so the caller is
    /// never blocked (§4.5 "Runtime reconfiguration").
    async fn init_collection(&self, collection: &CollectionSummary) {
        let roms = match self.client.get_collection_roms(collection.id).await {
            Ok(r) => r,
            Err(e) => {
                self.hooks
                    .log(&format!("collection sync: could not fetch '{}': {e}", collection.name));
                return;
            }
        };
        let rom_ids: HashSet<i64> = roms.iter().map(|r| r.id).collect();
        self.collection_caches
            .lock()
            .await
            .insert(collection.name.clone(), rom_ids.clone());
        self.hooks.log(&format!(
            "Initialized cache for '{}': {} games",
            collection.name,
            rom_ids.len()
        ));
        self.handle_added_games(&roms, &rom_ids, &collection.name).await;
    }

    /// Select a new set of collections to auto-sync. The selection itself is
    /// visible to the status assembler immediately; newly added collections
    /// are initialized in a detached task so this call never blocks the
    /// caller (§4.5 "Runtime reconfiguration").
    pub async fn set_selected(self: &Arc<Self>, new_selection: HashSet<String>) {
        let old = self.selected.read().await.clone();
        let added: Vec<String> = new_selection.difference(&old).cloned().collect();
        let removed: Vec<String> = old.difference(&new_selection).cloned().collect();

        *self.selected.write().await = new_selection;

        for name in removed {
            self.collection_caches.lock().await.remove(&name);
            self.hooks.log(&format!("Removed collection from sync: {name}"));
        }

        for name in added {
            let this = self.clone();
            tokio::spawn(async move {
                if let Ok(all) = this.client.get_collections().await {
                    if let Some(collection) = all.into_iter().find(|c| c.name == name) {
                        this.init_collection(&collection).await;
                    }
                }
            });
        }
    }

    /// Run the periodic diff loop until `stop` fires (§4.5 "Loop").
    pub async fn run(self: Arc<Self>, period: Duration, mut stop: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = stop.changed() => {}
            }
            if *stop.borrow() {
                break;
            }
            self.check_for_changes().await;
        }
    }

    /// Compare cached membership to fresh membership for every selected
    /// collection; added ROMs are downloaded, removed ROMs are optionally
    /// deleted (§4.5 "Diff").
    async fn check_for_changes(&self) {
        self.hooks.log("Checking collections for changes...");
        let selected = self.selected_collections().await;
        let all = match self.client.get_collections().await {
            Ok(c) => c,
            Err(e) => {
                self.hooks.log(&format!("collection sync: change check failed: {e}"));
                return;
            }
        };

        for collection in &all {
            if !selected.contains(&collection.name) {
                continue;
            }
            let roms = match self.client.get_collection_roms(collection.id).await {
                Ok(r) => r,
                Err(e) => {
                    self.hooks.log(&format!(
                        "collection sync: could not refresh '{}': {e}",
                        collection.name
                    ));
                    continue;
                }
            };
            let current: HashSet<i64> = roms.iter().map(|r| r.id).collect();
            let previous = self
                .collection_caches
                .lock()
                .await
                .get(&collection.name)
                .cloned()
                .unwrap_or_default();

            if current == previous {
                continue;
            }

            let added: HashSet<i64> = current.difference(&previous).copied().collect();
            let removed: HashSet<i64> = previous.difference(&current).copied().collect();

            if !added.is_empty() {
                self.hooks.log(&format!(
                    "Collection '{}': {} games added",
                    collection.name,
                    added.len()
                ));
                self.handle_added_games(&roms, &added, &collection.name).await;
            }
            if !removed.is_empty() {
                self.hooks.log(&format!(
                    "Collection '{}': {} games removed",
                    collection.name,
                    removed.len()
                ));
                self.handle_removed_games(&removed, &collection.name).await;
            }

            self.collection_caches
                .lock()
                .await
                .insert(collection.name.clone(), current);
        }
    }

    /// Download every ROM in `added_ids` that is not already present on
    /// disk, tracking `{downloaded, total}` progress for the status
    /// assembler as each one completes (§4.5 "Added-games handler").
    async fn handle_added_games(&self, collection_roms: &[RomEntry], added_ids: &HashSet<i64>, collection_name: &str) {
        if !self.auto_download {
            self.hooks
                .log(&format!("New games in '{collection_name}' but auto-download disabled"));
            return;
        }

        let total_collection_size = collection_roms.len() as u64;
        let mut existing_count: u64 = 0;
        let mut to_download: Vec<&RomEntry> = Vec::new();

        for rom in collection_roms {
            let local_path = self.local_rom_path(rom);
            if is_validly_downloaded(&local_path) {
                existing_count += 1;
            } else if added_ids.contains(&rom.id) {
                to_download.push(rom);
            }
        }

        if to_download.is_empty() {
            self.hooks.log(&format!("All ROMs in '{collection_name}' already downloaded"));
            return;
        }

        self.download_progress.lock().await.insert(
            collection_name.to_string(),
            DownloadProgress {
                downloaded: existing_count,
                total: total_collection_size,
                downloaded_pct: 0.0,
                speed_bytes_per_sec: 0.0,
            },
        );

        let mut completed_before = existing_count;
        let mut downloaded_count = 0u64;

        for rom in to_download {
            let local_path = self.local_rom_path(rom);
            if let Some(parent) = local_path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }

            // Pre-chunk update: bump immediately so the UI moves before the
            // first byte arrives, using a tiny fractional pct (§4.5).
            self.set_progress_start(collection_name, completed_before, total_collection_size)
                .await;

            let progress_name = collection_name.to_string();
            let progress_map = &self.download_progress;
            let base = completed_before;
            let total = total_collection_size;

            let result = self
                .client
                .download_rom_content(
                    rom.id,
                    &rom.file_name,
                    &local_path,
                    |written, content_len| {
                        let Some(total_bytes) = content_len else { return };
                        if total_bytes == 0 {
                            return;
                        }
                        let frac = written as f64 / total_bytes as f64;
                        let overall_pct = if total > 0 {
                            ((base as f64 + frac) / total as f64 * 100.0 * 10.0).round() / 10.0
                        } else {
                            0.0
                        };
                        // Best-effort: a blocking_lock from inside a sync
                        // closure would deadlock the async runtime, so this
                        // chunk callback only updates via try_lock.
                        if let Ok(mut map) = progress_map.try_lock() {
                            if let Some(p) = map.get_mut(&progress_name) {
                                p.downloaded_pct = overall_pct;
                            }
                        }
                    },
                    || false,
                )
                .await;

            match result {
                Ok(DownloadOutcome::Downloaded { bytes_written }) => {
                    self.hooks.log(&format!("Downloaded {}", rom.name));
                    downloaded_count += 1;
                    completed_before = existing_count + downloaded_count;
                    self.cache
                        .write()
                        .await
                        .mark_downloaded(rom.id, local_path.to_string_lossy().into_owned(), bytes_written);
                    if let Some(p) = self.download_progress.lock().await.get_mut(collection_name) {
                        p.downloaded = completed_before;
                    }
                }
                Ok(DownloadOutcome::Cancelled) => {}
                Err(e) => {
                    self.hooks
                        .log(&format!("Failed to download {}: {e}", rom.name));
                }
            }
        }

        self.download_progress.lock().await.remove(collection_name);
        if downloaded_count > 0 {
            self.hooks.log(&format!(
                "Auto-downloaded {downloaded_count} new games from '{collection_name}'"
            ));
        }
    }

    async fn set_progress_start(&self, collection_name: &str, base: u64, total: u64) {
        if let Some(p) = self.download_progress.lock().await.get_mut(collection_name) {
            p.downloaded = base + 1;
            p.downloaded_pct = if total > 0 {
                (base as f64 + 0.01) / total as f64 * 100.0
            } else {
                0.0
            };
            p.speed_bytes_per_sec = 0.0;
        }
    }

    /// Record a removal event unconditionally; delete the local file only
    /// when auto-delete is enabled and the ROM isn't still present in some
    /// other tracked collection (§4.5 "Removed-games handler").
    async fn handle_removed_games(&self, removed_ids: &HashSet<i64>, collection_name: &str) {
        if !self.auto_delete {
            self.last_removals.lock().await.insert(
                collection_name.to_string(),
                RemovalEvent {
                    removed_count: removed_ids.len() as u64,
                    deleted_count: 0,
                    timestamp: chrono::Utc::now(),
                },
            );
            self.hooks
                .log(&format!("Games removed from '{collection_name}' but auto-delete disabled"));
            return;
        }

        let other_collections: HashSet<i64> = {
            let caches = self.collection_caches.lock().await;
            caches
                .iter()
                .filter(|(name, _)| name.as_str() != collection_name)
                .flat_map(|(_, ids)| ids.iter().copied())
                .collect()
        };

        let mut deleted_count = 0u64;
        let cache = self.cache.read().await;
        for &rom_id in removed_ids {
            if other_collections.contains(&rom_id) {
                continue;
            }
            let Some(game) = cache.game_by_id(rom_id) else { continue };
            let Some(local_path) = &game.local_path else { continue };
            if std::fs::remove_file(local_path).is_ok() {
                deleted_count += 1;
                self.hooks.log(&format!("Deleted {}", game.name));
            }
        }
        drop(cache);

        if deleted_count > 0 {
            self.hooks
                .log(&format!("Auto-deleted {deleted_count} games removed from '{collection_name}'"));
        }

        self.last_removals.lock().await.insert(
            collection_name.to_string(),
            RemovalEvent {
                removed_count: removed_ids.len() as u64,
                deleted_count,
                timestamp: chrono::Utc::now(),
            },
        );
    }

    fn local_rom_path(&self, rom: &RomEntry) -> PathBuf {
        self.rom_directory.join(&rom.platform_slug).join(&rom.file_name)
    }
}

/// A local ROM file counts as downloaded only if it exists and is non-empty
/// — a zero-byte file from an interrupted download must not be mistaken for
/// a complete one.
fn is_validly_downloaded(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_or_missing_files_are_not_validly_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.sfc");
        assert!(!is_validly_downloaded(&missing));

        let empty = dir.path().join("empty.sfc");
        std::fs::write(&empty, b"").unwrap();
        assert!(!is_validly_downloaded(&empty));

        let present = dir.path().join("present.sfc");
        std::fs::write(&present, b"data").unwrap();
        assert!(is_validly_downloaded(&present));
    }
}
