//! Sync engine: the concurrency model of §5 wired together as one struct.
//!
//! Each concern keeps its own task and its own state; this module only owns
//! the lock, the shared stop signal, and the handles needed to join/stop
//! them cleanly. Nothing here does direct I/O itself.

pub mod collections;
pub mod launch_monitor;
pub mod lock;
pub mod reconcile;
pub mod upload;
pub mod watcher;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::catalog::{CatalogCache, CatalogClient};
use crate::emulator::Installation;
use crate::error::AppResult;
use crate::host_hooks::HostHooks;
use crate::models::CollectionSummary;

use collections::CollectionSync;
use lock::InstanceLock;
use upload::FingerprintStore;
use watcher::DebounceState;

/// Default period for the collection sync loop (§4.5), used when
/// `Collections.sync_interval` is absent or unparsable.
pub const DEFAULT_COLLECTION_SYNC_PERIOD: std::time::Duration = std::time::Duration::from_secs(120);

/// Everything needed to run one sync session: the instance lock, the
/// catalog client and cache, the emulator installation, and every
/// background task's handle (§5).
pub struct Engine {
    _lock: InstanceLock,
    pub client: Arc<CatalogClient>,
    pub cache: Arc<RwLock<CatalogCache>>,
    pub collection_sync: Arc<CollectionSync>,
    pub debounce: Arc<DebounceState>,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    _watchers: Vec<notify::RecommendedWatcher>,
}

pub struct EngineConfig {
    pub lock_path: PathBuf,
    pub instance_label: String,
    pub rom_directory: PathBuf,
    pub selected_collections: std::collections::HashSet<String>,
    pub auto_download: bool,
    pub auto_delete: bool,
    pub collection_sync_interval: std::time::Duration,
}

impl Engine {
    /// Acquire the instance lock, load the catalog cache, and spawn the
    /// watcher, upload worker, launch monitor, and collection sync loop.
    /// Fails only if the lock is already held — every other component
    /// degrades by logging rather than aborting startup.
    pub async fn start(
        config: EngineConfig,
        config_dir: &std::path::Path,
        client: Arc<CatalogClient>,
        installation: Installation,
        hooks: Arc<dyn HostHooks>,
    ) -> AppResult<Self> {
        let instance_lock = InstanceLock::acquire(&config.lock_path, &config.instance_label)?;

        let cache = Arc::new(RwLock::new(CatalogCache::load(config_dir)?));
        let debounce = DebounceState::new();
        let fingerprints = FingerprintStore::new();
        let (stop_tx, stop_rx) = watch::channel(false);

        let collection_sync = CollectionSync::new(
            client.clone(),
            cache.clone(),
            hooks.clone(),
            config.rom_directory,
            config.selected_collections,
            config.auto_download,
            config.auto_delete,
        );

        let mut tasks = Vec::new();

        let watchers = spawn_roots_watchers(&installation.save_root, &installation.state_root, debounce.clone());
        if watchers.is_empty() {
            hooks.log("no save/state roots discovered; file watching disabled");
        }

        tasks.push(tokio::spawn(upload::run(
            debounce.clone(),
            fingerprints,
            client.clone(),
            cache.clone(),
            hooks.clone(),
            stop_rx.clone(),
        )));

        tasks.push(tokio::spawn(launch_monitor::run(
            installation,
            cache.clone(),
            client.clone(),
            debounce.clone(),
            hooks.clone(),
            stop_rx.clone(),
        )));

        let collection_sync_loop = collection_sync.clone();
        let collection_sync_interval = config.collection_sync_interval;
        tasks.push(tokio::spawn(async move {
            collection_sync_loop.initialize().await;
            collection_sync_loop.run(collection_sync_interval, stop_rx).await;
        }));

        Ok(Self {
            _lock: instance_lock,
            client,
            cache,
            collection_sync,
            debounce,
            stop_tx,
            tasks,
            _watchers: watchers,
        })
    }

    /// Signal every background task to stop and join each with a bounded
    /// timeout (§5 "Cancellation & timeout"). A task that doesn't quiesce
    /// in time is abandoned rather than allowed to hang shutdown forever;
    /// the lock still releases on drop regardless.
    pub async fn shutdown(mut self) {
        const JOIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
        let _ = self.stop_tx.send(true);
        for task in self.tasks.drain(..) {
            if tokio::time::timeout(JOIN_TIMEOUT, task).await.is_err() {
                log::warn!("engine: a background task did not stop within the shutdown timeout");
            }
        }
    }

    pub async fn current_collections(&self) -> AppResult<Vec<CollectionSummary>> {
        self.client.get_collections().await
    }
}

/// One watcher per distinct save/state root (§5 "one filesystem watcher
/// thread per save/state root"). When one root is an ancestor of (or equal
/// to) the other, a single recursive watcher on the ancestor already covers
/// both, so the redundant child watcher is skipped.
fn spawn_roots_watchers(
    save_root: &Option<PathBuf>,
    state_root: &Option<PathBuf>,
    debounce: Arc<DebounceState>,
) -> Vec<notify::RecommendedWatcher> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for root in [save_root, state_root].into_iter().flatten() {
        if !roots.iter().any(|r| root.starts_with(r)) {
            roots.retain(|r| !r.starts_with(root));
            roots.push(root.clone());
        }
    }

    roots
        .into_iter()
        .filter_map(|root| match watcher::spawn_watcher(root.clone(), debounce.clone()) {
            Ok(w) => Some(w),
            Err(e) => {
                log::warn!("engine: could not watch {root:?}: {e}");
                None
            }
        })
        .collect()
}
