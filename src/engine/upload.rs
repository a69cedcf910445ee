//! Upload worker (§4.4.3): a single-thread cooperative 1Hz loop reading off
//! the debounce map and pushing uploads through the catalog client.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::catalog::client::{CatalogClient, UploadOutcome};
use crate::catalog::CatalogCache;
use crate::emulator::filename::{autocleanup_for_slot, classify_local_file, local_to_upload_filename};
use crate::emulator::{self};
use crate::host_hooks::HostHooks;
use crate::models::{SaveType, Slot, UploadFingerprint};

use super::watcher::{DebounceState, DEBOUNCE_WINDOW};

const TICK: Duration = Duration::from_secs(1);

/// `(size, mtime)` fingerprints of the most recent successful upload per
/// path, mutated by exactly the upload worker (§5).
pub struct FingerprintStore {
    fingerprints: Mutex<HashMap<PathBuf, UploadFingerprint>>,
}

impl FingerprintStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fingerprints: Mutex::new(HashMap::new()),
        })
    }

    fn matches(&self, path: &Path, fp: UploadFingerprint) -> bool {
        self.fingerprints
            .lock()
            .expect("fingerprint mutex poisoned")
            .get(path)
            .is_some_and(|&stored| stored == fp)
    }

    fn store(&self, path: PathBuf, fp: UploadFingerprint) {
        self.fingerprints
            .lock()
            .expect("fingerprint mutex poisoned")
            .insert(path, fp);
    }
}

fn fingerprint_of(path: &Path) -> std::io::Result<UploadFingerprint> {
    let meta = std::fs::metadata(path)?;
    let mtime = meta.modified()?;
    let mtime_secs = mtime
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(UploadFingerprint {
        size: meta.len(),
        mtime_secs,
    })
}

/// Run the upload worker until `stop` is flagged. Intended to run as its
/// own tokio task.
pub async fn run(
    debounce: Arc<DebounceState>,
    fingerprints: Arc<FingerprintStore>,
    client: Arc<CatalogClient>,
    cache: Arc<tokio::sync::RwLock<CatalogCache>>,
    hooks: Arc<dyn HostHooks>,
    mut stop: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(TICK) => {}
            _ = stop.changed() => {}
        }
        if *stop.borrow() {
            break;
        }

        let batch = debounce.take_ready(DEBOUNCE_WINDOW);
        for path in batch {
            process_one(&path, &fingerprints, &client, &cache, &hooks).await;
        }
    }
}

async fn process_one(
    path: &Path,
    fingerprints: &FingerprintStore,
    client: &CatalogClient,
    cache: &tokio::sync::RwLock<CatalogCache>,
    hooks: &Arc<dyn HostHooks>,
) {
    let fp = match fingerprint_of(path) {
        Ok(fp) => fp,
        Err(e) => {
            log::warn!("upload worker: could not stat {path:?}: {e}");
            return;
        }
    };
    if fingerprints.matches(path, fp) {
        return;
    }

    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    let Some((save_type, slot)) = classify_local_file(file_name) else {
        return;
    };

    let rom_id = {
        let cache = cache.read().await;
        match_rom_for_path(&cache, file_name)
    };
    let Some(rom_id) = rom_id else {
        log::warn!("upload worker: no catalog match for {file_name}, skipping upload");
        return;
    };

    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) => {
            log::warn!("upload worker: could not read {path:?}: {e}");
            return;
        }
    };

    let save_kind = match save_type {
        SaveType::Save => "saves",
        SaveType::State => "states",
    };
    let field_name = match save_type {
        SaveType::Save => "saveFile",
        SaveType::State => "stateFile",
    };
    let when = Utc::now();
    // For saves specifically, reuse the previous server filename verbatim
    // when one exists, preserving the server's grouping (§4.1); states
    // always get a freshly stamped name.
    let upload_name = match save_type {
        SaveType::Save => match client.get_rom(rom_id).await {
            Ok(detail) => CatalogClient::previous_save_filename(&detail.user_saves)
                .unwrap_or_else(|| local_to_upload_filename(path, when)),
            Err(_) => local_to_upload_filename(path, when),
        },
        SaveType::State => local_to_upload_filename(path, when),
    };
    let device_id = hooks.device_id();
    let (autocleanup, autocleanup_limit) = autocleanup_for_slot(slot);

    let result = client
        .upload_save_state(
            save_kind,
            field_name,
            bytes,
            &upload_name,
            rom_id,
            None,
            device_id.as_deref(),
            Some(&slot.as_wire()),
            autocleanup,
            autocleanup_limit,
        )
        .await;

    match result {
        Ok(UploadOutcome::Success { id }) => {
            fingerprints.store(path.to_path_buf(), fp);
            let label = match save_type {
                SaveType::Save => "Save uploaded",
                SaveType::State => "State uploaded",
            };
            emulator::notify(label).await;
            hooks.log(&format!("{label}: {file_name}"));

            if save_type == SaveType::State {
                upload_sibling_screenshot(path, rom_id, id, client, when).await;
            }
        }
        Ok(UploadOutcome::Conflict(body)) => {
            emulator::notify("Sync conflict").await;
            hooks.log(&format!("upload conflict for {file_name}: {body}"));
        }
        Ok(UploadOutcome::Validation(body)) => {
            log::error!("upload validation error for {file_name}: {body}");
        }
        Err(e) => {
            log::error!("upload failed for {file_name}: {e}");
        }
    }
}

/// Match a local file's base name to a catalog ROM ID: strip timestamp
/// brackets, try an exact `fs_name_no_ext` match, then a region-tag-
/// stripped comparison (§4.4.5).
fn match_rom_for_path(cache: &CatalogCache, file_name: &str) -> Option<i64> {
    if let Some(entry) = cache.find_by_filename(file_name) {
        return Some(entry.id);
    }
    let stripped = crate::emulator::filename::strip_timestamp_bracket(file_name);
    let stem = Path::new(&stripped)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&stripped);
    let region_free = strip_region_tags(stem);
    cache
        .games()
        .iter()
        .find(|g| {
            let candidate_stem = Path::new(&g.file_name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            strip_region_tags(&candidate_stem) == region_free
        })
        .map(|g| g.id)
}

fn strip_region_tags(name: &str) -> String {
    static RE: std::sync::LazyLock<regex::Regex> =
        std::sync::LazyLock::new(|| regex::Regex::new(r"\s*\(.*?\)").expect("static regex"));
    RE.replace_all(name, "").trim().to_lowercase()
}

/// Probe sibling paths for a screenshot using multiple naming conventions;
/// the first that exists and is non-empty wins.
async fn upload_sibling_screenshot(
    state_path: &Path,
    rom_id: i64,
    state_id: i64,
    client: &CatalogClient,
    when: chrono::DateTime<Utc>,
) {
    let Some(screenshot_path) = find_sibling_screenshot(state_path) else {
        return;
    };
    let Ok(bytes) = tokio::fs::read(&screenshot_path).await else {
        return;
    };
    if bytes.is_empty() {
        return;
    }

    // Share the exact same timestamp bracket as the uploaded state.
    let stem = state_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("screenshot");
    let screenshot_name = crate::emulator::filename::stamp_for_upload(stem, ".png", when);

    match client
        .upload_screenshot(rom_id, state_id, bytes, &screenshot_name)
        .await
    {
        Ok(screenshot_id) => {
            if !matches!(
                client.verify_screenshot_link(state_id, screenshot_id).await,
                Ok(true)
            ) {
                let _ = client
                    .link_screenshot_explicit(state_id, screenshot_id)
                    .await;
            }
        }
        Err(e) => log::warn!("screenshot upload failed: {e}"),
    }
}

fn find_sibling_screenshot(state_path: &Path) -> Option<PathBuf> {
    let candidates = [
        state_path.with_extension(format!(
            "{}.png",
            state_path.extension().and_then(|e| e.to_str()).unwrap_or("state")
        )),
        state_path.with_extension("png"),
    ];
    candidates
        .into_iter()
        .find(|p| p.is_file() && std::fs::metadata(p).map(|m| m.len() > 0).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_tags_are_stripped_for_matching() {
        assert_eq!(strip_region_tags("Super Mario World (USA)"), "super mario world");
        assert_eq!(strip_region_tags("Super Mario World"), "super mario world");
    }

    #[test]
    fn fingerprint_round_trips_size_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SMW.srm");
        std::fs::write(&path, b"hello").unwrap();
        let fp = fingerprint_of(&path).unwrap();
        assert_eq!(fp.size, 5);

        let store = FingerprintStore::new();
        assert!(!store.matches(&path, fp));
        store.store(path.clone(), fp);
        assert!(store.matches(&path, fp));
    }
}
