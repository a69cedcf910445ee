//! Filename conversion between the server's timestamp-stamped form and the
//! local on-disk form the emulator expects, plus the reverse direction used
//! when uploading.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::models::{SaveType, Slot};

static TIMESTAMP_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\[[\d\-\s:]+\]").expect("static regex is valid"));

static BRACKET_CAPTURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d{4}-\d{2}-\d{2}) (\d{2})-(\d{2})-(\d{2})-(\d{3})\]")
        .expect("static regex is valid")
});

/// Strip the `[YYYY-MM-DD HH-MM-SS-mmm]` bracket (and any leading whitespace)
/// from a server filename, leaving the bare base name.
pub fn strip_timestamp_bracket(name: &str) -> String {
    TIMESTAMP_BRACKET.replace(name, "").into_owned()
}

/// Parse the bracketed timestamp embedded in a filename, if present.
pub fn parse_bracket_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let caps = BRACKET_CAPTURE.captures(name)?;
    let text = format!(
        "{} {}:{}:{}.{}",
        &caps[1], &caps[2], &caps[3], &caps[4], &caps[5]
    );
    let naive = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S.%3f").ok()?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

/// Parse a server-reported timestamp string: ISO-8601 first (naive timestamps
/// are treated as UTC), falling back to the bracket pattern embedded in a
/// filename.
pub fn parse_server_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }
    parse_bracket_timestamp(value)
}

/// Build the timestamp-stamped upload filename: `<base> [YYYY-MM-DD
/// HH-MM-SS-mmm]<ext>`, milliseconds truncated to three digits.
pub fn stamp_for_upload(base_name: &str, ext: &str, when: DateTime<Utc>) -> String {
    let millis = when.timestamp_subsec_millis();
    format!(
        "{base_name} [{}-{:03}]{ext}",
        when.format("%Y-%m-%d %H-%M-%S"),
        millis
    )
}

/// Server → local filename conversion for a save file.
pub fn save_to_local_filename(server_file_name: &str) -> String {
    let stripped = strip_timestamp_bracket(server_file_name);
    let path = std::path::Path::new(&stripped);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&stripped);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    match ext.as_deref() {
        Some("srm") => format!("{stem}.srm"),
        Some("sav") => format!("{stem}.sav"),
        _ => format!("{stem}.srm"),
    }
}

/// Server → local filename conversion for a save state. `slot` drives which
/// local extension is produced: `Slot::Auto` always writes `.state.auto`;
/// every other slot writes the quick-save slot `.state` (see the state
/// filename policy note in the module docs).
pub fn state_to_local_filename(server_file_name: &str, slot: Slot) -> String {
    if server_file_name.to_lowercase().ends_with(".state.auto") {
        let game_name = &server_file_name[..server_file_name.len() - ".state.auto".len()];
        let base = strip_timestamp_bracket(game_name);
        return format!("{base}.state.auto");
    }

    let stripped = strip_timestamp_bracket(server_file_name);
    let base = std::path::Path::new(&stripped)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&stripped)
        .to_string();

    if slot == Slot::Auto {
        format!("{base}.state.auto")
    } else {
        format!("{base}.state")
    }
}

/// Local → upload filename conversion: `<base> [timestamp]<original-ext>`.
/// Round-trips with `strip_timestamp_bracket` on the base name.
pub fn local_to_upload_filename(local_path: &std::path::Path, when: DateTime<Utc>) -> String {
    let file_name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if file_name.to_lowercase().ends_with(".state.auto") {
        let base = &file_name[..file_name.len() - ".state.auto".len()];
        return stamp_for_upload(base, ".state.auto", when);
    }

    let stem = local_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let ext = local_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    stamp_for_upload(stem, &ext, when)
}

/// Classify a local save/state filename into its save type and slot (§3).
/// `.state.auto` maps to `Slot::Auto`; `.stateN` to `Slot::Numbered(N)`;
/// bare `.state` to `Slot::Quicksave`; `.srm`/`.sav` carry no slot.
pub fn classify_local_file(file_name: &str) -> Option<(SaveType, Slot)> {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".srm") || lower.ends_with(".sav") {
        return Some((SaveType::Save, Slot::Unset));
    }
    if lower.ends_with(".state.auto") {
        return Some((SaveType::State, Slot::Auto));
    }
    if lower.ends_with(".state") {
        return Some((SaveType::State, Slot::Quicksave));
    }
    for n in 1..=9u8 {
        if lower.ends_with(&format!(".state{n}")) {
            return Some((SaveType::State, Slot::Numbered(n)));
        }
    }
    None
}

/// `(autocleanup, autocleanup_limit)` the upload worker sends alongside a
/// slot (§4.4.3). Battery saves carry no cleanup; auto and numbered slots
/// cap at 5 server-side revisions, the quicksave slot at 10.
pub fn autocleanup_for_slot(slot: Slot) -> (bool, Option<u32>) {
    match slot {
        Slot::Unset => (false, None),
        Slot::Auto | Slot::Numbered(_) => (true, Some(5)),
        Slot::Quicksave => (true, Some(10)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn strips_bracketed_timestamp() {
        assert_eq!(
            strip_timestamp_bracket("SMW [2024-01-01 12-00-00-000].srm"),
            "SMW.srm"
        );
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn stamps_upload_filename_with_truncated_millis() {
        let name = stamp_for_upload("SMW", ".srm", ts());
        assert_eq!(name, "SMW [2024-01-01 12-00-00-000].srm");
    }

    #[test]
    fn save_filename_defaults_to_srm_for_unknown_extension() {
        assert_eq!(
            save_to_local_filename("SMW [2024-01-01 12-00-00-000].bin"),
            "SMW.srm"
        );
        assert_eq!(
            save_to_local_filename("SMW [2024-01-01 12-00-00-000].sav"),
            "SMW.sav"
        );
    }

    #[test]
    fn state_filename_prefers_quicksave_slot() {
        assert_eq!(
            state_to_local_filename("SMW [2024-01-01 12-00-00-000].state1", Slot::Numbered(1)),
            "SMW.state"
        );
        assert_eq!(
            state_to_local_filename("SMW [2024-01-01 12-00-00-000].state.auto", Slot::Auto),
            "SMW.state.auto"
        );
    }

    #[test]
    fn local_to_upload_round_trips_base_name() {
        let path = std::path::Path::new("/saves/Snes9x/SMW.srm");
        let uploaded = local_to_upload_filename(path, ts());
        let back = save_to_local_filename(&uploaded);
        assert_eq!(back, "SMW.srm");
    }

    #[test]
    fn parses_bracket_timestamp() {
        let parsed = parse_bracket_timestamp("SMW [2024-01-01 12-00-00-000].srm").unwrap();
        assert_eq!(parsed, ts());
    }

    #[test]
    fn parses_server_iso8601_timestamp() {
        let parsed = parse_server_timestamp("2024-01-01T12:00:00Z").unwrap();
        assert_eq!(parsed, ts());
    }

    #[test]
    fn classifies_local_files_into_save_type_and_slot() {
        assert_eq!(
            classify_local_file("SMW.srm"),
            Some((crate::models::SaveType::Save, Slot::Unset))
        );
        assert_eq!(
            classify_local_file("SMW.state.auto"),
            Some((crate::models::SaveType::State, Slot::Auto))
        );
        assert_eq!(
            classify_local_file("SMW.state"),
            Some((crate::models::SaveType::State, Slot::Quicksave))
        );
        assert_eq!(
            classify_local_file("SMW.state3"),
            Some((crate::models::SaveType::State, Slot::Numbered(3)))
        );
        assert_eq!(classify_local_file("SMW.sfc"), None);
    }

    #[test]
    fn autocleanup_matches_per_slot_limits() {
        assert_eq!(autocleanup_for_slot(Slot::Unset), (false, None));
        assert_eq!(autocleanup_for_slot(Slot::Auto), (true, Some(5)));
        assert_eq!(autocleanup_for_slot(Slot::Numbered(3)), (true, Some(5)));
        assert_eq!(autocleanup_for_slot(Slot::Quicksave), (true, Some(10)));
    }
}
