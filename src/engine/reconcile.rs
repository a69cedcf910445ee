//! Download reconciler (§4.4.5): for a ROM whose server-side save/state
//! data changed, decide whether the server's copy should replace the local
//! file and, if so, fetch it.
//!
//! Saves carry no slot. States split into the quicksave/numbered group
//! (which all collapse onto the local `.state` file — see the state
//! filename policy note in `emulator::filename`) and the `Slot::Auto` group,
//! which is reconciled separately against `.state.auto` so a `.state.auto`
//! update never clobbers the quicksave slot.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::catalog::client::{CatalogClient, DownloadOutcome};
use crate::emulator::{self, filename::parse_server_timestamp, Installation};
use crate::error::AppResult;
use crate::host_hooks::HostHooks;
use crate::models::{most_recent_record, ConflictOutcome, ConflictPolicy, SaveRecord, Slot};

use super::watcher::{DebounceState, POST_DOWNLOAD_SUPPRESS};

const SAVE_EXTS: &[&str] = &[".srm", ".sav"];
const STATE_EXTS: &[&str] = &[
    ".state", ".state1", ".state2", ".state3", ".state4", ".state5", ".state6", ".state7",
    ".state8", ".state9",
];
const AUTO_STATE_EXTS: &[&str] = &[".state.auto"];

/// Fetch `rom_id`'s current server state and reconcile its save, its
/// quicksave/numbered states, and its `.state.auto` independently.
pub async fn reconcile_rom(
    rom_id: i64,
    client: &CatalogClient,
    installation: &Installation,
    debounce: &DebounceState,
    hooks: &dyn HostHooks,
) -> AppResult<()> {
    let detail = client.get_rom(rom_id).await?;

    if let Some(root) = &installation.save_root {
        reconcile_group(
            &detail.user_saves,
            "saves",
            SAVE_EXTS,
            root,
            installation,
            crate::emulator::filename::save_to_local_filename,
            client,
            debounce,
            hooks,
        )
        .await;
    }

    if let Some(root) = &installation.state_root {
        let (auto, rest): (Vec<SaveRecord>, Vec<SaveRecord>) = detail
            .user_states
            .iter()
            .cloned()
            .partition(|r| r.slot == Slot::Auto);

        reconcile_group(
            &rest,
            "states",
            STATE_EXTS,
            root,
            installation,
            |name| crate::emulator::filename::state_to_local_filename(name, Slot::Quicksave),
            client,
            debounce,
            hooks,
        )
        .await;

        reconcile_group(
            &auto,
            "states",
            AUTO_STATE_EXTS,
            root,
            installation,
            |name| crate::emulator::filename::state_to_local_filename(name, Slot::Auto),
            client,
            debounce,
            hooks,
        )
        .await;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn reconcile_group(
    records: &[SaveRecord],
    save_kind: &str,
    local_exts: &[&str],
    root: &Path,
    installation: &Installation,
    local_filename: impl Fn(&str) -> String,
    client: &CatalogClient,
    debounce: &DebounceState,
    hooks: &dyn HostHooks,
) {
    let Some(record) = most_recent_record(records) else {
        return;
    };

    let emulator_key = record.emulator.as_deref().unwrap_or_default();
    let folder = emulator::emulator_folder_for_scheme(emulator_key, installation.naming_scheme);
    let target = root.join(folder).join(local_filename(&record.file_name));

    let device_id = hooks.device_id();
    if let Some(device_id) = &device_id {
        let already_current = record
            .device_syncs
            .iter()
            .any(|d| &d.device_id == device_id && d.is_current);
        if already_current {
            return;
        }
        if client
            .device_has_synced(save_kind, record.rom_id, device_id)
            .await
            .unwrap_or(false)
        {
            return;
        }
    }

    let server_ts = record
        .updated_at
        .as_deref()
        .or(record.created_at.as_deref())
        .and_then(parse_server_timestamp);

    let outcome = decide(&target, server_ts, hooks.overwrite_policy(), hooks);
    if outcome != ConflictOutcome::DownloadServer {
        return;
    }

    if let Err(e) = backup_existing(&target) {
        log::warn!("reconcile: could not back up {target:?} before download: {e}");
    }

    match client
        .download_latest(records, save_kind, local_exts, device_id.as_deref(), &target)
        .await
    {
        Ok(DownloadOutcome::Downloaded { bytes_written }) if bytes_written > 0 => {
            debounce.suppress_for(target.clone(), POST_DOWNLOAD_SUPPRESS);
            let label = if save_kind == "saves" { "Save downloaded" } else { "State downloaded" };
            emulator::notify(label).await;
            hooks.log(&format!("{label}: {}", target.display()));
            if save_kind == "states" {
                download_linked_screenshot(record, &target, client, debounce).await;
            }
        }
        Ok(_) => {}
        Err(e) => log::warn!("reconcile: download failed for {target:?}: {e}"),
    }
}

/// Compare a local file's mtime against the server's `updated_at` under the
/// configured policy. A missing local file always downloads — there is
/// nothing local to conflict with.
fn decide(
    target: &Path,
    server_ts: Option<DateTime<Utc>>,
    policy: ConflictPolicy,
    hooks: &dyn HostHooks,
) -> ConflictOutcome {
    let Some(server_ts) = server_ts else {
        return ConflictOutcome::Equivalent;
    };
    let local_ts = local_mtime(target);
    let Some(local_ts) = local_ts else {
        return ConflictOutcome::DownloadServer;
    };

    match policy {
        ConflictPolicy::AlwaysLocal => ConflictOutcome::KeepLocal,
        ConflictPolicy::AlwaysServer => ConflictOutcome::DownloadServer,
        ConflictPolicy::Smart => {
            let diff_secs = (server_ts - local_ts).num_seconds();
            if diff_secs > 10 {
                ConflictOutcome::DownloadServer
            } else if diff_secs < -60 {
                ConflictOutcome::KeepLocal
            } else {
                ConflictOutcome::Equivalent
            }
        }
        ConflictPolicy::Ask => {
            if hooks.ask_conflict(local_ts, server_ts) {
                ConflictOutcome::KeepLocal
            } else {
                ConflictOutcome::DownloadServer
            }
        }
    }
}

fn local_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Rename an existing target out of the way before overwriting it, so a
/// failed or partial download never destroys the prior local copy. Any
/// earlier backup is replaced.
fn backup_existing(target: &Path) -> std::io::Result<()> {
    if !target.exists() {
        return Ok(());
    }
    let backup = backup_path(target);
    if backup.exists() {
        std::fs::remove_file(&backup)?;
    }
    std::fs::rename(target, backup)
}

/// `<target>.backup` (§4.4.5 step 6).
fn backup_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().and_then(|n| n.to_str()).unwrap_or("file").to_string();
    name.push_str(".backup");
    target.with_file_name(name)
}

async fn download_linked_screenshot(
    record: &SaveRecord,
    state_target: &Path,
    client: &CatalogClient,
    debounce: &DebounceState,
) {
    let Some(screenshot) = &record.screenshot else {
        return;
    };
    let Some(download_path) = &screenshot.download_path else {
        return;
    };
    let screenshot_target = state_target.with_extension(format!(
        "{}.png",
        state_target.extension().and_then(|e| e.to_str()).unwrap_or("state")
    ));
    match client.download_by_path(download_path, &screenshot_target).await {
        Ok(()) => debounce.suppress_for(screenshot_target, Duration::from_secs(5)),
        Err(e) => log::debug!("reconcile: screenshot download failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_hooks::HeadlessHooks;
    use chrono::TimeZone;

    fn hooks() -> HeadlessHooks {
        HeadlessHooks::new(None, ConflictPolicy::Smart)
    }

    #[test]
    fn missing_local_file_always_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("SMW.srm");
        let server_ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            decide(&target, Some(server_ts), ConflictPolicy::Smart, &hooks()),
            ConflictOutcome::DownloadServer
        );
    }

    #[test]
    fn smart_policy_keeps_local_when_newer_by_more_than_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("SMW.srm");
        std::fs::write(&target, b"local").unwrap();
        let server_ts = Utc::now() - chrono::Duration::seconds(120);
        assert_eq!(
            decide(&target, Some(server_ts), ConflictPolicy::Smart, &hooks()),
            ConflictOutcome::KeepLocal
        );
    }

    #[test]
    fn smart_policy_downloads_server_when_newer_by_more_than_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("SMW.srm");
        std::fs::write(&target, b"local").unwrap();
        let server_ts = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(
            decide(&target, Some(server_ts), ConflictPolicy::Smart, &hooks()),
            ConflictOutcome::DownloadServer
        );
    }

    #[test]
    fn always_local_keeps_existing_file_regardless_of_server_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("SMW.srm");
        std::fs::write(&target, b"local").unwrap();
        let server_ts = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(
            decide(&target, Some(server_ts), ConflictPolicy::AlwaysLocal, &hooks()),
            ConflictOutcome::KeepLocal
        );
    }

    #[test]
    fn backup_renames_existing_file_out_of_the_way() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("SMW.srm");
        std::fs::write(&target, b"local").unwrap();
        backup_existing(&target).unwrap();
        assert!(!target.exists());
        assert!(dir.path().join("SMW.srm.backup").exists());
    }

    #[test]
    fn backup_replaces_a_prior_backup() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("SMW.srm");
        std::fs::write(dir.path().join("SMW.srm.backup"), b"stale").unwrap();
        std::fs::write(&target, b"fresh").unwrap();
        backup_existing(&target).unwrap();
        let contents = std::fs::read(dir.path().join("SMW.srm.backup")).unwrap();
        assert_eq!(contents, b"fresh");
    }
}
