//! Filesystem watcher & debounce map (§4.4.2, §4.4.3).
//!
//! Watcher→upload-worker communication is a map+timestamp rather than a
//! channel so rapid re-triggers coalesce naturally instead of queuing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

const STARTUP_GRACE: Duration = Duration::from_secs(5);
const REDUNDANT_WINDOW: Duration = Duration::from_secs(10);
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(3);
pub const POST_DOWNLOAD_SUPPRESS: Duration = Duration::from_secs(30);

const STATE_SLOT_EXTS: &[&str] = &[
    ".state", ".state1", ".state2", ".state3", ".state4", ".state5", ".state6", ".state7",
    ".state8", ".state9",
];
const SAVE_EXTS: &[&str] = &[".srm", ".sav"];

/// Whether `file_name` (already lowercased) looks like a save or state file
/// this engine tracks. `.state.auto` is a compound extension that
/// `Path::extension()` would only see as `.auto`, so matching is done on
/// the full lowercased name's suffix instead.
pub fn is_tracked_save_file(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    lower.ends_with(".state.auto")
        || STATE_SLOT_EXTS.iter().any(|ext| lower.ends_with(ext))
        || SAVE_EXTS.iter().any(|ext| lower.ends_with(ext))
}

/// The shared `last_change_time` map plus engine-start bookkeeping.
pub struct DebounceState {
    last_change_time: Mutex<HashMap<PathBuf, Instant>>,
    started_at: Instant,
}

impl DebounceState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            last_change_time: Mutex::new(HashMap::new()),
            started_at: Instant::now(),
        })
    }

    /// Record a modify event for `path`, subject to the startup grace
    /// period and redundant-trigger suppression window.
    pub fn record_change(&self, path: PathBuf) {
        let now = Instant::now();
        if now.duration_since(self.started_at) < STARTUP_GRACE {
            log::debug!("watcher: dropping event for {path:?} inside startup grace period");
            return;
        }
        let mut map = self.last_change_time.lock().expect("debounce mutex poisoned");
        if let Some(&prev) = map.get(&path) {
            if now.duration_since(prev) < REDUNDANT_WINDOW {
                return;
            }
        }
        map.insert(path, now);
    }

    /// Move every path whose recorded timestamp is at least `window` in the
    /// past out of the map and into the returned batch.
    pub fn take_ready(&self, window: Duration) -> Vec<PathBuf> {
        let now = Instant::now();
        let mut map = self.last_change_time.lock().expect("debounce mutex poisoned");
        let ready: Vec<PathBuf> = map
            .iter()
            .filter(|(_, &t)| now.duration_since(t) >= window)
            .map(|(p, _)| p.clone())
            .collect();
        for path in &ready {
            map.remove(path);
        }
        ready
    }

    /// Suppress auto-upload of `path` for `suppress_for`: used after a
    /// reconciler download so writes that follow (the emulator touching its
    /// own just-written file) don't re-upload (§4.4.5 step 7).
    pub fn suppress_for(&self, path: PathBuf, suppress_for: Duration) {
        let until = Instant::now() + suppress_for;
        self.last_change_time
            .lock()
            .expect("debounce mutex poisoned")
            .insert(path, until);
    }

    /// Clear every pending debounce entry: called when the emulator process
    /// exits, since its exit-time save flush would otherwise duplicate the
    /// upload already performed by the launch monitor (§4.4.4).
    pub fn clear_all(&self) {
        self.last_change_time
            .lock()
            .expect("debounce mutex poisoned")
            .clear();
    }
}

/// One watcher thread per save/state root (§5), filtering modify events to
/// tracked save/state filenames and recording them into `debounce`.
pub fn spawn_watcher(root: PathBuf, debounce: Arc<DebounceState>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let Ok(event) = res else { return };
        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
            return;
        }
        for path in event.paths {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if is_tracked_save_file(name) {
                debounce.record_change(path);
            }
        }
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_save_and_state_extensions() {
        assert!(is_tracked_save_file("smw.srm"));
        assert!(is_tracked_save_file("SMW.SAV"));
        assert!(is_tracked_save_file("smw.state"));
        assert!(is_tracked_save_file("smw.state3"));
        assert!(is_tracked_save_file("smw.state.auto"));
        assert!(!is_tracked_save_file("smw.state.auto.png"));
        assert!(!is_tracked_save_file("smw.sfc"));
    }

    #[test]
    fn startup_grace_drops_early_events() {
        let state = DebounceState::new();
        state.record_change(PathBuf::from("/a"));
        assert!(state.take_ready(Duration::from_secs(0)).is_empty());
    }

    #[test]
    fn redundant_trigger_within_window_is_discarded() {
        let state = Arc::new(DebounceState {
            last_change_time: Mutex::new(HashMap::new()),
            started_at: Instant::now() - Duration::from_secs(10),
        });
        let path = PathBuf::from("/a");
        state.record_change(path.clone());
        let first_stamp = *state
            .last_change_time
            .lock()
            .unwrap()
            .get(&path)
            .unwrap();
        state.record_change(path.clone());
        let second_stamp = *state
            .last_change_time
            .lock()
            .unwrap()
            .get(&path)
            .unwrap();
        assert_eq!(first_stamp, second_stamp);
    }

    #[test]
    fn take_ready_only_returns_old_enough_entries() {
        let state = Arc::new(DebounceState {
            last_change_time: Mutex::new(HashMap::new()),
            started_at: Instant::now() - Duration::from_secs(10),
        });
        state.record_change(PathBuf::from("/a"));
        assert!(state.take_ready(Duration::from_secs(3)).is_empty());
        std::thread::sleep(Duration::from_millis(50));
        assert!(state.take_ready(Duration::from_millis(10)).len() == 1);
    }
}
