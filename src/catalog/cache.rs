//! Catalog cache (C3): an on-disk mirror of the last successful ROM list,
//! with a 24h expiry and in-memory filename/platform indexes (§3, §4.2).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::AppResult;
use crate::models::RomEntry;
use crate::platform_registry;

const EXPIRY_SECS: i64 = 86_400;
const KNOWN_EXTENSIONS: &[&str] = &["zip", "7z", "bin", "iso", "chd"];

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    timestamp: DateTime<Utc>,
    count: usize,
    games: Vec<RomEntry>,
    platform_mapping: HashMap<String, String>,
}

/// The in-memory mirror plus its background persistence worker.
pub struct CatalogCache {
    path: PathBuf,
    games: Vec<RomEntry>,
    platform_mapping: HashMap<String, String>,
    filename_index: HashMap<String, i64>,
    loaded_at: Option<DateTime<Utc>>,
    save_tx: mpsc::UnboundedSender<CacheFile>,
}

impl CatalogCache {
    /// Load `<config>/cache/games_data.json`. Loads from disk if present
    /// and not expired; an expired cache is treated as absent. Spawns the
    /// background save worker so callers are never blocked on disk I/O.
    pub fn load(config_dir: &Path) -> AppResult<Self> {
        let cache_dir = config_dir.join("cache");
        std::fs::create_dir_all(&cache_dir)?;
        let path = cache_dir.join("games_data.json");

        let (save_tx, mut save_rx) = mpsc::unbounded_channel::<CacheFile>();
        let worker_path = path.clone();
        tokio::spawn(async move {
            while let Some(file) = save_rx.recv().await {
                if let Err(e) = write_cache_file(&worker_path, &file).await {
                    log::warn!("catalog cache: background save failed: {e}");
                }
            }
        });

        let mut cache = Self {
            path,
            games: Vec::new(),
            platform_mapping: platform_registry::fallback_mapping(),
            filename_index: HashMap::new(),
            loaded_at: None,
            save_tx,
        };

        if let Ok(text) = std::fs::read_to_string(&cache.path) {
            if let Ok(file) = serde_json::from_str::<CacheFile>(&text) {
                let age = Utc::now().signed_duration_since(file.timestamp).num_seconds();
                if age < EXPIRY_SECS {
                    cache.loaded_at = Some(file.timestamp);
                    cache.platform_mapping = merge_platform_mapping(
                        platform_registry::fallback_mapping(),
                        file.platform_mapping,
                    );
                    cache.set_games(file.games);
                } else {
                    log::info!("catalog cache: on-disk cache expired ({age}s old), ignoring");
                }
            }
        }

        Ok(cache)
    }

    pub fn is_present(&self) -> bool {
        self.loaded_at.is_some()
    }

    pub fn games(&self) -> &[RomEntry] {
        &self.games
    }

    /// Replace the cached game list, re-deriving the filename index and
    /// post-processing each entry's displayed platform name so it is always
    /// the mapping's display name, never the raw slug.
    pub fn set_games(&mut self, mut games: Vec<RomEntry>) {
        for game in &mut games {
            let display = self
                .platform_mapping
                .get(&game.platform_slug)
                .cloned()
                .or_else(|| platform_registry::display_name(&game.platform_slug).map(str::to_string));
            if let Some(display) = display {
                game.platform_name = display;
            }
        }
        self.filename_index = build_filename_index(&games);
        self.games = games;
    }

    /// Merge server-supplied platform entries into the mapping: an override
    /// only takes effect when absent from the fallback or strictly more
    /// informative than it (§4.2).
    pub fn merge_platforms(&mut self, server_mapping: HashMap<String, String>) {
        self.platform_mapping = merge_platform_mapping(self.platform_mapping.clone(), server_mapping);
    }

    pub fn platform_display_name(&self, slug: &str) -> Option<String> {
        self.platform_mapping.get(slug).cloned()
    }

    /// Look up a ROM by `file_name`, stem, or a known extension variant.
    pub fn find_by_filename(&self, file_name: &str) -> Option<&RomEntry> {
        let id = self
            .filename_index
            .get(file_name)
            .or_else(|| {
                let stem = Path::new(file_name).file_stem()?.to_str()?;
                self.filename_index.get(stem)
            })?;
        self.games.iter().find(|g| g.id == *id)
    }

    pub fn game_by_id(&self, rom_id: i64) -> Option<&RomEntry> {
        self.games.iter().find(|g| g.id == rom_id)
    }

    /// Record a successful collection download: update the live entry's
    /// `is_downloaded`/`local_path`/`local_size` so the status assembler's
    /// live-counted non-tracked-collection path reflects it immediately
    /// (§4.5 "Added-games handler").
    pub fn mark_downloaded(&mut self, rom_id: i64, local_path: String, local_size: u64) {
        if let Some(game) = self.games.iter_mut().find(|g| g.id == rom_id) {
            game.is_downloaded = true;
            game.local_path = Some(local_path);
            game.local_size = Some(local_size);
        }
    }

    /// Persist the cache: write-temp, rename, dispatched to the background
    /// worker so the caller never blocks on disk I/O.
    pub fn save(&self) {
        let file = CacheFile {
            timestamp: Utc::now(),
            count: self.games.len(),
            games: self.games.clone(),
            platform_mapping: self.platform_mapping.clone(),
        };
        if self.save_tx.send(file).is_err() {
            log::warn!("catalog cache: background save worker has shut down");
        }
    }
}

async fn write_cache_file(path: &Path, file: &CacheFile) -> AppResult<()> {
    let serialized = serde_json::to_vec_pretty(file)
        .map_err(|e| crate::error::AppError::Other(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &serialized).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn build_filename_index(games: &[RomEntry]) -> HashMap<String, i64> {
    let mut index = HashMap::new();
    for game in games {
        index.insert(game.file_name.clone(), game.id);
        if let Some(stem) = Path::new(&game.file_name).file_stem().and_then(|s| s.to_str()) {
            index.entry(stem.to_string()).or_insert(game.id);
            for ext in KNOWN_EXTENSIONS {
                index
                    .entry(format!("{stem}.{ext}"))
                    .or_insert(game.id);
            }
        }
    }
    index
}

/// Start with `fallback`, overlay `server` entries only when absent from
/// fallback or strictly more informative (non-slug-looking) than it.
fn merge_platform_mapping(
    mut fallback: HashMap<String, String>,
    server: HashMap<String, String>,
) -> HashMap<String, String> {
    for (slug, name) in server {
        match fallback.get(&slug) {
            None => {
                fallback.insert(slug, name);
            }
            Some(existing) if is_more_informative(&name, existing) => {
                fallback.insert(slug, name);
            }
            _ => {}
        }
    }
    fallback
}

/// A candidate display name is "strictly more informative" than the
/// existing one if it isn't just the slug restated (contains whitespace or
/// uppercase) and is longer.
fn is_more_informative(candidate: &str, existing: &str) -> bool {
    let looks_like_slug = !candidate.contains(' ') && candidate == candidate.to_lowercase();
    !looks_like_slug && candidate.len() > existing.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, file_name: &str, slug: &str) -> RomEntry {
        RomEntry {
            id,
            name: file_name.to_string(),
            file_name: file_name.to_string(),
            platform_name: String::new(),
            platform_slug: slug.to_string(),
            multi: false,
            file_size_bytes: None,
            is_downloaded: false,
            local_path: None,
            local_size: None,
            romm_data: serde_json::Value::Null,
        }
    }

    #[test]
    fn filename_index_covers_stem_and_extension_variants() {
        let games = vec![entry(1, "Super Mario World.sfc", "snes")];
        let index = build_filename_index(&games);
        assert_eq!(index.get("Super Mario World.sfc"), Some(&1));
        assert_eq!(index.get("Super Mario World"), Some(&1));
        assert_eq!(index.get("Super Mario World.zip"), Some(&1));
        assert_eq!(index.get("Super Mario World.chd"), Some(&1));
    }

    #[test]
    fn merge_prefers_informative_server_names_only() {
        let mut fallback = HashMap::new();
        fallback.insert("snes".to_string(), "Super Nintendo Entertainment System".to_string());

        let mut server = HashMap::new();
        server.insert("snes".to_string(), "snes".to_string()); // not informative
        server.insert("gba".to_string(), "Game Boy Advance".to_string()); // new entry

        let merged = merge_platform_mapping(fallback, server);
        assert_eq!(
            merged.get("snes").unwrap(),
            "Super Nintendo Entertainment System"
        );
        assert_eq!(merged.get("gba").unwrap(), "Game Boy Advance");
    }

    #[test]
    fn merge_is_idempotent() {
        let mut fallback = HashMap::new();
        fallback.insert("snes".to_string(), "Super Nintendo Entertainment System".to_string());
        let once = merge_platform_mapping(fallback.clone(), fallback.clone());
        let twice = merge_platform_mapping(once.clone(), once.clone());
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn load_creates_empty_cache_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CatalogCache::load(dir.path()).unwrap();
        assert!(!cache.is_present());
        assert!(cache.games().is_empty());
    }

    #[tokio::test]
    async fn save_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CatalogCache::load(dir.path()).unwrap();
        cache.set_games(vec![entry(1, "SMW.sfc", "snes")]);
        cache.save();

        // Give the background worker a moment to flush.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let reloaded = CatalogCache::load(dir.path()).unwrap();
        assert!(reloaded.is_present());
        assert_eq!(reloaded.games().len(), 1);
    }
}
