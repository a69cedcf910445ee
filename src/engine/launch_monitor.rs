//! Launch monitor (C5, §4.4.4): watches for the emulator starting,
//! finishing a content load, or quitting, and triggers a pre-launch /
//! on-load reconcile pass at the moment it matters most — before the
//! player's first save overwrites whatever the server already has.
//!
//! Detection is layered, in priority order: the UDP network command port
//! (authoritative, reflects the exact moment content finishes loading),
//! falling back to the RetroArch history playlist's mtime when the network
//! port isn't responding (older builds, or `network_cmd_enable` off).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sysinfo::System;
use tokio::sync::RwLock;

use crate::catalog::{CatalogCache, CatalogClient};
use crate::emulator::{self, Installation};
use crate::engine::reconcile;
use crate::engine::watcher::DebounceState;
use crate::host_hooks::HostHooks;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const ALREADY_SYNCED_WINDOW: Duration = Duration::from_secs(30);
const MAX_NETWORK_RETRIES: u8 = 3;

struct MonitorState {
    process_running: bool,
    last_network_active: bool,
    network_retry_count: u8,
    startup_grace: bool,
    last_history_mtime: Option<std::time::SystemTime>,
    last_synced: HashMap<PathBuf, Instant>,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            process_running: false,
            last_network_active: false,
            network_retry_count: 0,
            startup_grace: true,
            last_history_mtime: None,
            last_synced: HashMap::new(),
        }
    }
}

/// Run the monitor loop until `stop` fires. `cache` resolves a loaded
/// content path to a ROM ID via the filename index; `installation` locates
/// the history playlist and the save/state roots reconciling writes into.
pub async fn run(
    installation: Installation,
    cache: Arc<RwLock<CatalogCache>>,
    client: Arc<CatalogClient>,
    debounce: Arc<DebounceState>,
    hooks: Arc<dyn HostHooks>,
    mut stop: tokio::sync::watch::Receiver<bool>,
) {
    let mut system = System::new();
    let mut state = MonitorState::default();
    let self_pid = sysinfo::get_current_pid().ok();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = stop.changed() => {}
        }
        if *stop.borrow() {
            break;
        }

        system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        let running = is_emulator_running(&system, self_pid);
        if running != state.process_running {
            if running {
                hooks.log("Emulator launched");
                if let Some(content) = current_content(&installation) {
                    hooks.log(&format!(
                        "Pre-launch sync for {}",
                        content.file_name().and_then(|n| n.to_str()).unwrap_or("")
                    ));
                    sync_for_content(&content, &cache, &client, &installation, &debounce, &hooks).await;
                    state.last_synced.insert(content, Instant::now());
                }
            } else {
                hooks.log("Emulator closed");
                state.network_retry_count = 0;
                debounce.clear_all();
            }
            state.process_running = running;
        }

        let network_active = emulator::get_status()
            .await
            .map(|reply| emulator::status_indicates_content(&reply))
            .unwrap_or(false);

        if network_active != state.last_network_active {
            if network_active {
                match current_content(&installation) {
                    Some(content) => {
                        let recently_synced = state
                            .last_synced
                            .get(&content)
                            .is_some_and(|t| t.elapsed() < ALREADY_SYNCED_WINDOW);
                        if recently_synced {
                            hooks.log("Content loaded (already synced)");
                        } else {
                            hooks.log("Content loaded, syncing saves");
                            sync_for_content(&content, &cache, &client, &installation, &debounce, &hooks).await;
                            state.last_synced.insert(content, Instant::now());
                        }
                        state.last_network_active = true;
                        state.network_retry_count = 0;
                    }
                    None if state.network_retry_count < MAX_NETWORK_RETRIES => {
                        state.network_retry_count += 1;
                        hooks.log(&format!(
                            "Network active but no content detected, retrying ({}/{})",
                            state.network_retry_count, MAX_NETWORK_RETRIES
                        ));
                    }
                    None => {
                        hooks.log("Network active, no content detected; will sync when content loads");
                        state.last_network_active = true;
                    }
                }
            } else {
                state.last_network_active = false;
                state.network_retry_count = 0;
            }
        } else if state.process_running && !network_active {
            // Fallback: the network port isn't responding, so fall back to
            // watching the history playlist's mtime for a game change.
            if let Some(history_path) = history_playlist_path(&installation) {
                if let Ok(meta) = std::fs::metadata(&history_path) {
                    let mtime = meta.modified().ok();
                    if state.startup_grace {
                        state.startup_grace = false;
                        state.last_history_mtime = mtime;
                    } else if mtime != state.last_history_mtime {
                        if let Some(content) = read_history_content(&history_path) {
                            hooks.log("History fallback detected a game change");
                            sync_for_content(&content, &cache, &client, &installation, &debounce, &hooks).await;
                            state.last_synced.insert(content, Instant::now());
                        }
                        state.last_history_mtime = mtime;
                    }
                }
            }
        }
    }
}

async fn sync_for_content(
    content_path: &Path,
    cache: &Arc<RwLock<CatalogCache>>,
    client: &CatalogClient,
    installation: &Installation,
    debounce: &DebounceState,
    hooks: &dyn HostHooks,
) {
    let Some(rom_id) = find_rom_id(content_path, cache).await else {
        return;
    };
    if let Err(e) = reconcile::reconcile_rom(rom_id, client, installation, debounce, hooks).await {
        hooks.log(&format!("launch sync failed: {e}"));
    }
}

/// Match a loaded content path's file name (stripping any `#entry` archive
/// suffix) against the catalog's filename index.
async fn find_rom_id(content_path: &Path, cache: &Arc<RwLock<CatalogCache>>) -> Option<i64> {
    let raw = content_path.to_str()?;
    let real_path = raw.split('#').next().unwrap_or(raw);
    let file_name = Path::new(real_path).file_name()?.to_str()?;
    cache.read().await.find_by_filename(file_name).map(|rom| rom.id)
}

fn is_emulator_running(system: &System, self_pid: Option<sysinfo::Pid>) -> bool {
    system.processes().iter().any(|(pid, process)| {
        if Some(*pid) == self_pid {
            return false;
        }
        let name = process.name().to_string_lossy().to_lowercase();
        name == "retroarch"
    })
}

/// Find the config dir's `content_history.lpl` (or RetroDECK's
/// `playlists/builtin` variant) and return the first item's `path`, applying
/// the same archive-path (`file.zip#entry`) existence check the original
/// history reader used.
fn current_content(installation: &Installation) -> Option<PathBuf> {
    let history_path = history_playlist_path(installation)?;
    read_history_content(&history_path)
}

fn history_playlist_path(installation: &Installation) -> Option<PathBuf> {
    let config_dir = installation.config_path.as_deref()?.parent()?;
    for candidate in [
        config_dir.join("content_history.lpl"),
        config_dir.join("playlists").join("builtin").join("content_history.lpl"),
    ] {
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

fn read_history_content(history_path: &Path) -> Option<PathBuf> {
    let text = std::fs::read_to_string(history_path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&text).ok()?;
    let first = value.get("items")?.as_array()?.first()?;
    let rom_path = first.get("path")?.as_str()?;
    if rom_path.is_empty() || rom_path == "N/A" {
        return None;
    }
    let real_path = rom_path.split('#').next().unwrap_or(rom_path);
    if Path::new(real_path).exists() {
        Some(PathBuf::from(rom_path))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_content_rejects_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let history = dir.path().join("content_history.lpl");
        std::fs::write(&history, r#"{"items":[{"path":"/does/not/exist.zip"}]}"#).unwrap();
        assert_eq!(read_history_content(&history), None);
    }

    #[test]
    fn history_content_accepts_present_archive_member_path() {
        let dir = tempfile::tempdir().unwrap();
        let rom = dir.path().join("game.zip");
        std::fs::write(&rom, b"data").unwrap();
        let history = dir.path().join("content_history.lpl");
        let entry_path = format!("{}#game.sfc", rom.display());
        std::fs::write(&history, format!(r#"{{"items":[{{"path":"{entry_path}"}}]}}"#)).unwrap();
        assert_eq!(read_history_content(&history), Some(PathBuf::from(entry_path)));
    }

    #[test]
    fn history_content_rejects_na_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let history = dir.path().join("content_history.lpl");
        std::fs::write(&history, r#"{"items":[{"path":"N/A"}]}"#).unwrap();
        assert_eq!(read_history_content(&history), None);
    }
}
