use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single ROM as mirrored from the catalog server.
///
/// `(platform_slug, file_name)` is the local-disk identity; `id` is the
/// server identity. `romm_data` retains the raw server payload verbatim so
/// filename matching never depends on a field this crate forgot to model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RomEntry {
    pub id: i64,
    pub name: String,
    pub file_name: String,
    pub platform_name: String,
    pub platform_slug: String,
    #[serde(default)]
    pub multi: bool,
    pub file_size_bytes: Option<u64>,
    #[serde(default)]
    pub is_downloaded: bool,
    pub local_path: Option<String>,
    pub local_size: Option<u64>,
    #[serde(default)]
    pub romm_data: serde_json::Value,
}

/// A server-side save or state record.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveRecord {
    pub id: i64,
    pub rom_id: i64,
    pub file_name: String,
    pub emulator: Option<String>,
    #[serde(default)]
    pub slot: Slot,
    pub updated_at: Option<String>,
    pub created_at: Option<String>,
    pub file_size_bytes: Option<u64>,
    pub download_path: Option<String>,
    pub screenshot: Option<ScreenshotRef>,
    #[serde(default)]
    pub device_syncs: Vec<DeviceSync>,
}

impl<'de> Deserialize<'de> for Slot {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        Ok(Slot::parse(&raw))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScreenshotRef {
    pub id: i64,
    pub download_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSync {
    pub device_id: String,
    #[serde(default)]
    pub is_current: bool,
}

/// A save-state's slot classification. Saves carry no slot (`Unset`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Slot {
    #[default]
    Unset,
    Auto,
    Quicksave,
    Numbered(u8),
}

impl Serialize for Slot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.as_wire())
    }
}

impl Slot {
    /// Parse the server's slot string (`"auto"`, `"quicksave"`, `"slot1"`..`"slot9"`).
    pub fn parse(raw: &str) -> Self {
        match raw {
            "" => Slot::Unset,
            "auto" => Slot::Auto,
            "quicksave" => Slot::Quicksave,
            other => other
                .strip_prefix("slot")
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| (1..=9).contains(n))
                .map_or(Slot::Unset, Slot::Numbered),
        }
    }

    pub fn as_wire(self) -> String {
        match self {
            Slot::Unset => String::new(),
            Slot::Auto => "auto".to_string(),
            Slot::Quicksave => "quicksave".to_string(),
            Slot::Numbered(n) => format!("slot{n}"),
        }
    }
}

/// What a local save-data file represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveType {
    Save,
    State,
}

/// A save/state file discovered on local disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSaveFile {
    pub file_name: String,
    pub file_path: String,
    pub save_type: SaveType,
    pub slot: Slot,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    pub screenshot_path: Option<String>,
}

/// `(size, mtime)` fingerprint of the most recent successful upload of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadFingerprint {
    pub size: u64,
    pub mtime_secs: i64,
}

/// Device identity registered with the catalog server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub platform: String,
    pub client: String,
    pub client_version: String,
}

/// Server-side named ROM collection.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionSummary {
    pub id: i64,
    pub name: String,
}

/// Per-collection live download progress, surfaced by the status assembler.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DownloadProgress {
    pub downloaded: u64,
    pub total: u64,
    pub downloaded_pct: f64,
    pub speed_bytes_per_sec: f64,
}

/// A pending or completed collection-removal event.
#[derive(Debug, Clone, Serialize)]
pub struct RemovalEvent {
    pub removed_count: u64,
    pub deleted_count: u64,
    pub timestamp: DateTime<Utc>,
}

/// OAuth2-password-grant token pair plus expiry bookkeeping.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenPair {
    /// The client refreshes when fewer than 300s remain before expiry.
    pub fn needs_refresh(&self) -> bool {
        (self.expires_at - Utc::now()).num_seconds() < 300
    }
}

/// Conflict-resolution policy for the download reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    AlwaysLocal,
    AlwaysServer,
    Smart,
    Ask,
}

/// Pick the most recent record by `updated_at` (fallback `created_at`,
/// fallback `file_name`) — §4.1 step 3 / §4.4.5 step 2.
pub fn most_recent_record(records: &[SaveRecord]) -> Option<&SaveRecord> {
    records.iter().max_by_key(|r| record_sort_key(r))
}

fn record_sort_key(record: &SaveRecord) -> (i64, &str) {
    use crate::emulator::filename::parse_server_timestamp;
    let ts = record
        .updated_at
        .as_deref()
        .and_then(parse_server_timestamp)
        .or_else(|| record.created_at.as_deref().and_then(parse_server_timestamp))
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0);
    (ts, record.file_name.as_str())
}

/// Outcome of comparing a local file's mtime against a server record's `updated_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    KeepLocal,
    DownloadServer,
    Equivalent,
}

/// Mapping from platform slug to display name, merged from the hard-coded
/// fallback table and server-supplied overrides.
pub type PlatformMapping = HashMap<String, String>;

/// Mapping from a lookup key (file name, stem, or known extension variant)
/// to the matching catalog entry's server ID.
pub type FilenameMapping = HashMap<String, i64>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    pub authenticated: bool,
    pub rom_count: u64,
}

/// Local cache of a tracked collection's membership, consulted by the
/// collection sync loop's diff (§4.5).
#[derive(Debug, Clone, Default)]
pub struct CollectionCache {
    pub rom_ids: std::collections::HashSet<i64>,
}

/// Save-folder naming scheme an emulator installation uses, detected by
/// scanning its save/state roots (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingScheme {
    CoreName,
    PlatformSlug,
}

/// Live state the status assembler (C7) renders into a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    NotSynced,
    Syncing,
    Synced,
}

/// Per-collection view the status assembler exposes to the front-end.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStatus {
    pub name: String,
    pub auto_sync: bool,
    pub sync_state: SyncState,
    pub downloaded: u64,
    pub total: u64,
    pub speed_bytes_per_sec: Option<f64>,
    pub downloaded_pct: Option<f64>,
    pub last_removal: Option<RemovalEvent>,
}

/// Full status snapshot (C7): a pure function of live component state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub auto_sync_enabled: bool,
    pub game_count: u64,
    pub collections: Vec<CollectionStatus>,
    pub emulator_warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, file_name: &str, updated_at: Option<&str>) -> SaveRecord {
        SaveRecord {
            id,
            rom_id: 1,
            file_name: file_name.to_string(),
            emulator: Some("snes9x".to_string()),
            slot: Slot::Unset,
            updated_at: updated_at.map(str::to_string),
            created_at: None,
            file_size_bytes: None,
            download_path: None,
            screenshot: None,
            device_syncs: Vec::new(),
        }
    }

    #[test]
    fn most_recent_record_picks_latest_updated_at() {
        let records = vec![
            record(1, "SMW [2024-01-01 00-00-00-000].srm", Some("2024-01-01T00:00:00Z")),
            record(2, "SMW [2024-06-01 00-00-00-000].srm", Some("2024-06-01T00:00:00Z")),
        ];
        assert_eq!(most_recent_record(&records).unwrap().id, 2);
    }

    #[test]
    fn most_recent_record_falls_back_to_filename_bracket() {
        // No `updated_at`/`created_at`; the bracketed timestamp in the
        // filename itself breaks the tie (§4.1 step 3).
        let records = vec![
            record(1, "SMW [2024-01-01 00-00-00-000].srm", None),
            record(2, "SMW [2024-06-01 00-00-00-000].srm", None),
        ];
        assert_eq!(most_recent_record(&records).unwrap().id, 2);
    }

    #[test]
    fn most_recent_record_on_empty_slice_is_none() {
        assert!(most_recent_record(&[]).is_none());
    }

    #[test]
    fn slot_wire_round_trips() {
        for slot in [Slot::Unset, Slot::Auto, Slot::Quicksave, Slot::Numbered(7)] {
            assert_eq!(Slot::parse(&slot.as_wire()), slot);
        }
    }

    #[test]
    fn slot_parse_rejects_out_of_range_numbers() {
        assert_eq!(Slot::parse("slot0"), Slot::Unset);
        assert_eq!(Slot::parse("slot10"), Slot::Unset);
        assert_eq!(Slot::parse("garbage"), Slot::Unset);
    }

    #[test]
    fn token_pair_needs_refresh_inside_threshold() {
        let soon = TokenPair {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            token_type: "bearer".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(200),
        };
        assert!(soon.needs_refresh());

        let later = TokenPair {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            token_type: "bearer".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(3600),
        };
        assert!(!later.needs_refresh());
    }
}
