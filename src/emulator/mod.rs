//! Emulator interface (C4): discovery of the installation's executable,
//! save/state directories, folder-naming scheme, and config; UDP
//! notifications; filesystem-shape detection for already-downloaded ROMs
//! (§4.3).

pub mod filename;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::models::NamingScheme;
use crate::platform_registry;

const NOTIFY_ADDR: &str = "127.0.0.1:55355";
const UDP_TIMEOUT: Duration = Duration::from_secs(2);

/// A discovered RetroArch-compatible installation.
#[derive(Debug, Clone)]
pub struct Installation {
    pub executable: Option<PathBuf>,
    pub save_root: Option<PathBuf>,
    pub state_root: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub naming_scheme: NamingScheme,
}

/// ROM-library folder layout convention, detected when scanning a local ROM
/// directory for already-downloaded games (used by C6; §4.3 supplement).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderLayout {
    /// Lowercase slug folders: `gb/`, `gba/`, `snes/` — ES-DE, EmuDeck, ArkOS.
    EsDe,
    /// `roms/` (or `EASYROMS/`) subdirectory of lowercase slugs — Batocera, KNULLI.
    Batocera,
    /// Sibling `ROMS/`+`MUOS/` directories.
    MuOs,
    /// `"Name (TAG)"` folders — MinUI.
    MinUi,
    /// `ALL_CAPS` folder names — OnionOS.
    OnionOs,
    Unknown,
}

/// Probe candidate roots in fixed order (§4.3): container sandbox paths
/// first, then native config dirs, then store-specific subtrees. The first
/// root containing `saves/` or `states/` is selected.
pub fn discover_installation(custom_path: Option<&Path>) -> Installation {
    let executable = discover_executable(custom_path);
    let (save_root, state_root) = discover_save_state_roots();
    let config_path = discover_config_path();
    let naming_scheme = save_root
        .as_deref()
        .or(state_root.as_deref())
        .map(detect_naming_scheme)
        .unwrap_or(NamingScheme::CoreName);

    Installation {
        executable,
        save_root,
        state_root,
        config_path,
        naming_scheme,
    }
}

/// Executable discovery priority: native binary on `PATH`, a configured
/// custom path, a platform-store installation, a container/sandbox
/// installation, a portable bundle in user directories. Returns the first
/// candidate that exists and is runnable.
fn discover_executable(custom_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = which_on_path("retroarch") {
        return Some(p);
    }
    if let Some(custom) = custom_path {
        if is_runnable(custom) {
            return Some(custom.to_path_buf());
        }
    }
    for candidate in store_candidates().into_iter().chain(sandbox_candidates()).chain(portable_candidates()) {
        if is_runnable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn which_on_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(name);
        is_runnable(&candidate).then_some(candidate)
    })
}

fn is_runnable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

fn store_candidates() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(home) = dirs::home_dir() {
        // Steam (platform-store install).
        out.push(home.join(".steam/steam/steamapps/common/RetroArch/retroarch"));
        out.push(home.join("Library/Application Support/Steam/steamapps/common/RetroArch/RetroArch.app/Contents/MacOS/RetroArch"));
    }
    out
}

fn sandbox_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/var/lib/flatpak/app/org.libretro.RetroArch/current/active/files/bin/retroarch"),
        PathBuf::from("/snap/bin/retroarch"),
    ]
}

fn portable_candidates() -> Vec<PathBuf> {
    dirs::home_dir()
        .map(|h| vec![h.join("RetroArch/retroarch"), h.join("Applications/RetroArch.app/Contents/MacOS/RetroArch")])
        .unwrap_or_default()
}

/// Candidate save/state roots in fixed probe order. A root whose
/// `retroarch.cfg` names explicit `savefile_directory`/`savestate_directory`
/// values wins outright, even when those directories sit outside the config
/// root itself; otherwise the first root containing a `saves/` or `states/`
/// subdirectory is used.
fn discover_save_state_roots() -> (Option<PathBuf>, Option<PathBuf>) {
    for root in candidate_config_roots() {
        let cfg = root.join("retroarch.cfg");
        if cfg.is_file() {
            if let Some(configured) = read_configured_save_state_dirs(&cfg) {
                return configured;
            }
        }

        let saves = root.join("saves");
        let states = root.join("states");
        if saves.is_dir() || states.is_dir() {
            return (
                saves.is_dir().then_some(saves),
                states.is_dir().then_some(states),
            );
        }
    }
    (None, None)
}

/// Read `savefile_directory`/`savestate_directory` out of a `retroarch.cfg`,
/// tilde-expanding each. Returns `None` when neither key resolves to an
/// existing directory, so the caller falls back to subdirectory probing.
fn read_configured_save_state_dirs(cfg_path: &Path) -> Option<(Option<PathBuf>, Option<PathBuf>)> {
    let text = std::fs::read_to_string(cfg_path).ok()?;

    let mut save_dir = None;
    let mut state_dir = None;
    for line in text.lines() {
        let line = line.trim();
        if save_dir.is_none() {
            save_dir = parse_retroarch_cfg_value(line, "savefile_directory").map(|v| expand_tilde(&v));
        }
        if state_dir.is_none() {
            state_dir = parse_retroarch_cfg_value(line, "savestate_directory").map(|v| expand_tilde(&v));
        }
        if save_dir.is_some() && state_dir.is_some() {
            break;
        }
    }

    let save_dir = save_dir.map(PathBuf::from).filter(|p| p.is_dir());
    let state_dir = state_dir.map(PathBuf::from).filter(|p| p.is_dir());
    (save_dir.is_some() || state_dir.is_some()).then_some((save_dir, state_dir))
}

/// Parse a `key = "value"` line from `retroarch.cfg`.
fn parse_retroarch_cfg_value(line: &str, key: &str) -> Option<String> {
    let rest = line.strip_prefix(key)?.trim();
    let rest = rest.strip_prefix('=')?.trim().trim_matches('"');
    (!rest.is_empty()).then(|| rest.to_string())
}

fn expand_tilde(path: &str) -> String {
    path.strip_prefix("~/")
        .and_then(|rest| dirs::home_dir().map(|home| home.join(rest).to_string_lossy().into_owned()))
        .unwrap_or_else(|| path.to_string())
}

fn candidate_config_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(home) = dirs::home_dir() {
        // Container/sandbox paths first.
        roots.push(home.join(".var/app/org.libretro.RetroArch/config/retroarch"));
        roots.push(home.join("snap/retroarch/current/.config/retroarch"));
        // Native config dirs.
        roots.push(home.join(".config/retroarch"));
        roots.push(home.join("Library/Application Support/RetroArch"));
        roots.push(home.join("AppData/Roaming/RetroArch"));
        // Store-specific subtrees.
        roots.push(home.join(".steam/steam/steamapps/compatdata/RetroArch"));
    }
    roots
}

fn discover_config_path() -> Option<PathBuf> {
    candidate_config_roots()
        .into_iter()
        .map(|r| r.join("retroarch.cfg"))
        .find(|p| p.is_file())
}

/// Scan a save/state root's immediate subdirectories, counting matches
/// against known core-folder names and known platform slugs. The dominant
/// style is the detected scheme; unknown falls back to core-names.
pub fn detect_naming_scheme(root: &Path) -> NamingScheme {
    let Ok(entries) = std::fs::read_dir(root) else {
        return NamingScheme::CoreName;
    };

    let mut slug_matches = 0;
    let mut core_matches = 0;
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if platform_registry::is_known_folder(&name.to_lowercase()) {
            slug_matches += 1;
        }
        if is_known_core_folder(&name) {
            core_matches += 1;
        }
    }

    match slug_matches.cmp(&core_matches) {
        std::cmp::Ordering::Greater => NamingScheme::PlatformSlug,
        std::cmp::Ordering::Less => NamingScheme::CoreName,
        std::cmp::Ordering::Equal if core_matches > 0 => NamingScheme::CoreName,
        _ => NamingScheme::CoreName,
    }
}

fn is_known_core_folder(name: &str) -> bool {
    platform_registry::PLATFORMS
        .iter()
        .any(|p| p.core_folder_name == Some(name))
}

/// Map a server `emulator` key back to a local save-state folder: a slug
/// (for platform-slug-scheme installs) via a known table, otherwise a
/// display folder name via generic fallbacks (`_libretro`→``, `_`→` `,
/// Title Case).
pub fn emulator_folder_for_scheme(server_emulator: &str, scheme: NamingScheme) -> String {
    match scheme {
        NamingScheme::PlatformSlug => platform_registry::resolve_server_slug(server_emulator),
        NamingScheme::CoreName => core_folder_display_name(server_emulator),
    }
}

fn core_folder_display_name(server_emulator: &str) -> String {
    static KNOWN: &[(&str, &str)] = &[
        ("snes9x", "Snes9x"),
        ("mesen", "Mesen"),
        ("beetle_psx_hw", "Beetle PSX HW"),
        ("genesis_plus_gx", "Genesis Plus GX"),
        ("mgba", "mGBA"),
    ];
    if let Some((_, display)) = KNOWN.iter().find(|(k, _)| *k == server_emulator) {
        return (*display).to_string();
    }
    let stripped = server_emulator.replace("_libretro", "");
    let spaced = stripped.replace('_', " ");
    title_case(&spaced)
}

fn title_case(input: &str) -> String {
    input
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ---- UDP notifications (§4.3) ----

/// Fire-and-forget `SHOW_MSG <text>` datagram; no acknowledgement expected.
pub async fn notify(text: &str) {
    let message = format!("SHOW_MSG {text}");
    if let Err(e) = send_udp(&message).await {
        log::debug!("UDP notify failed (emulator likely not running): {e}");
    }
}

/// Send `GET_STATUS` and return the raw reply, if any arrived within the
/// timeout.
pub async fn get_status() -> Option<String> {
    send_udp_recv("GET_STATUS").await
}

async fn send_udp(message: &str) -> std::io::Result<()> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let addr: SocketAddr = NOTIFY_ADDR.parse().expect("static address is valid");
    socket.send_to(message.as_bytes(), addr).await?;
    Ok(())
}

async fn send_udp_recv(message: &str) -> Option<String> {
    let socket = UdpSocket::bind("127.0.0.1:0").await.ok()?;
    let addr: SocketAddr = NOTIFY_ADDR.parse().ok()?;
    socket.send_to(message.as_bytes(), addr).await.ok()?;

    let mut buf = [0u8; 512];
    let recv = tokio::time::timeout(UDP_TIMEOUT, socket.recv_from(&mut buf)).await;
    match recv {
        Ok(Ok((n, _))) => Some(String::from_utf8_lossy(&buf[..n]).trim().to_string()),
        _ => None,
    }
}

/// Does a `GET_STATUS` reply indicate content is loaded? (§4.4.4)
pub fn status_indicates_content(reply: &str) -> bool {
    let trimmed = reply.trim();
    !trimmed.is_empty()
        && trimmed != "N/A"
        && !trimmed.contains("CONTENTLESS")
        && !trimmed.contains("MENU")
}

// ---- Config probing (§4.3) ----

#[derive(Debug, Clone, Default)]
pub struct ConfigWarnings {
    pub warnings: Vec<String>,
}

/// Parse the emulator's INI-like config to check that network commands are
/// enabled on the expected port and that save-state thumbnails are enabled.
/// Mismatches are warnings, not errors.
pub fn probe_config(config_path: &Path) -> ConfigWarnings {
    let mut warnings = ConfigWarnings::default();
    let Ok(text) = std::fs::read_to_string(config_path) else {
        warnings
            .warnings
            .push(format!("could not read config at {}", config_path.display()));
        return warnings;
    };

    let values = parse_cfg(&text);

    let network_enabled = values
        .get("network_cmd_enable")
        .map(|v| v == "true")
        .unwrap_or(false);
    if !network_enabled {
        warnings
            .warnings
            .push("network_cmd_enable is not set to true".to_string());
    }

    let port_ok = values
        .get("network_cmd_port")
        .map(|v| v == "55355")
        .unwrap_or(true);
    if !port_ok {
        warnings
            .warnings
            .push("network_cmd_port is not 55355".to_string());
    }

    let thumbnails_enabled = values
        .get("savestate_thumbnail_enable")
        .map(|v| v == "true")
        .unwrap_or(false);
    if !thumbnails_enabled {
        warnings
            .warnings
            .push("savestate_thumbnail_enable is not set to true".to_string());
    }

    warnings
}

fn parse_cfg(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        out.insert(key.trim().to_string(), value.to_string());
    }
    out
}

// ---- ROM-library folder layout detection (supplement; §4.3) ----

/// Detect the folder layout convention of a local ROM directory.
pub fn detect_folder_layout(root: &Path) -> FolderLayout {
    let entries: Vec<String> = match std::fs::read_dir(root) {
        Ok(rd) => rd
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect(),
        Err(_) => return FolderLayout::Unknown,
    };
    if entries.is_empty() {
        return FolderLayout::Unknown;
    }

    if entries.iter().any(|n| n == "ROMS") && entries.iter().any(|n| n == "MUOS") {
        return FolderLayout::MuOs;
    }

    let batocera_dir = if entries.iter().any(|n| n == "roms") {
        Some(root.join("roms"))
    } else if entries.iter().any(|n| n == "EASYROMS") {
        Some(root.join("EASYROMS"))
    } else {
        None
    };
    if let Some(roms_sub) = batocera_dir {
        if let Ok(sub_entries) = std::fs::read_dir(&roms_sub) {
            let known_count = sub_entries
                .filter_map(Result::ok)
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|n| platform_registry::is_known_folder(&n.to_lowercase()))
                .count();
            if known_count >= 2 {
                return FolderLayout::Batocera;
            }
        }
    }

    let minui_count = entries
        .iter()
        .filter(|n| n.contains('(') && n.ends_with(')') && n.rfind('(').is_some_and(|i| i > 0))
        .count();
    if minui_count >= 3 {
        return FolderLayout::MinUi;
    }

    let upper_count = entries
        .iter()
        .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_uppercase() || c.is_ascii_digit() || c == '_'))
        .count();
    if upper_count > entries.len() / 2 && upper_count >= 3 {
        return FolderLayout::OnionOs;
    }

    let esde_count = entries
        .iter()
        .filter(|n| platform_registry::is_known_folder(n))
        .count();
    if esde_count >= 3 {
        return FolderLayout::EsDe;
    }

    FolderLayout::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reply_contentless_means_no_content() {
        assert!(!status_indicates_content("GET_STATUS CONTENTLESS"));
        assert!(!status_indicates_content("MENU"));
        assert!(!status_indicates_content("N/A"));
        assert!(!status_indicates_content(""));
    }

    #[test]
    fn status_reply_with_content_path_means_loaded() {
        assert!(status_indicates_content(
            "GET_STATUS PLAYING,Super Mario World.sfc,crc32=abcdef"
        ));
    }

    #[test]
    fn detects_es_de_layout() {
        let dir = tempfile::tempdir().unwrap();
        for slug in ["gb", "gba", "snes"] {
            std::fs::create_dir(dir.path().join(slug)).unwrap();
        }
        assert_eq!(detect_folder_layout(dir.path()), FolderLayout::EsDe);
    }

    #[test]
    fn detects_batocera_layout() {
        let dir = tempfile::tempdir().unwrap();
        let roms = dir.path().join("roms");
        std::fs::create_dir(&roms).unwrap();
        for slug in ["gb", "gba"] {
            std::fs::create_dir(roms.join(slug)).unwrap();
        }
        assert_eq!(detect_folder_layout(dir.path()), FolderLayout::Batocera);
    }

    #[test]
    fn title_cases_core_folder_fallback() {
        assert_eq!(core_folder_display_name("stella2014"), "Stella2014");
        assert_eq!(core_folder_display_name("mednafen_psx_libretro"), "Mednafen Psx");
    }

    #[test]
    fn config_probe_flags_disabled_network_commands() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("retroarch.cfg");
        std::fs::write(&cfg, "network_cmd_enable = \"false\"\n").unwrap();
        let warnings = probe_config(&cfg);
        assert!(warnings.warnings.iter().any(|w| w.contains("network_cmd_enable")));
    }

    #[test]
    fn reads_configured_save_state_dirs_from_retroarch_cfg() {
        let dir = tempfile::tempdir().unwrap();
        let saves = dir.path().join("custom_saves");
        let states = dir.path().join("custom_states");
        std::fs::create_dir(&saves).unwrap();
        std::fs::create_dir(&states).unwrap();

        let cfg = dir.path().join("retroarch.cfg");
        std::fs::write(
            &cfg,
            format!(
                "savefile_directory = \"{}\"\nsavestate_directory = \"{}\"\n",
                saves.display(),
                states.display()
            ),
        )
        .unwrap();

        let (found_saves, found_states) = read_configured_save_state_dirs(&cfg).unwrap();
        assert_eq!(found_saves, Some(saves));
        assert_eq!(found_states, Some(states));
    }

    #[test]
    fn configured_dirs_missing_from_disk_fall_back_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("retroarch.cfg");
        std::fs::write(
            &cfg,
            "savefile_directory = \"/nonexistent/does/not/exist\"\n",
        )
        .unwrap();
        assert!(read_configured_save_state_dirs(&cfg).is_none());
    }

    #[test]
    fn expand_tilde_resolves_home_relative_paths() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/RetroArch/saves"), home.join("RetroArch/saves").to_string_lossy());
        }
        assert_eq!(expand_tilde("/abs/path"), "/abs/path");
    }
}
