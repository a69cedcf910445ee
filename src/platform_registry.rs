use std::collections::HashMap;
use std::sync::LazyLock;

/// Definition of a single platform in the registry.
pub struct PlatformDef {
    pub slug: &'static str,
    pub display_name: &'static str,
    pub folder_aliases: &'static [&'static str],
    pub romm_aliases: &'static [&'static str],
    /// Core-name-scheme folder name used by save/state directories that key
    /// on emulator core rather than platform slug.
    pub core_folder_name: Option<&'static str>,
}

/// Central platform registry — single source of truth for all platform data.
pub const PLATFORMS: &[PlatformDef] = &[
    // ── Nintendo ──
    PlatformDef {
        slug: "gb",
        display_name: "Game Boy",
        folder_aliases: &["gb"],
        romm_aliases: &["game-boy"],
        core_folder_name: Some("Nintendo - Game Boy"),
    },
    PlatformDef {
        slug: "gbc",
        display_name: "Game Boy Color",
        folder_aliases: &["gbc"],
        romm_aliases: &["game-boy-color"],
        core_folder_name: Some("Nintendo - Game Boy Color"),
    },
    PlatformDef {
        slug: "gba",
        display_name: "Game Boy Advance",
        folder_aliases: &["gba"],
        romm_aliases: &["game-boy-advance"],
        core_folder_name: Some("Nintendo - Game Boy Advance"),
    },
    PlatformDef {
        slug: "nes",
        display_name: "NES / Famicom",
        folder_aliases: &["nes", "fc", "famicom"],
        romm_aliases: &["nintendo-entertainment-system", "famicom"],
        core_folder_name: Some("Nintendo - Nintendo Entertainment System"),
    },
    PlatformDef {
        slug: "fds",
        display_name: "Famicom Disk System",
        folder_aliases: &["fds"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "snes",
        display_name: "SNES / Super Famicom",
        folder_aliases: &["snes", "sfc"],
        romm_aliases: &["super-nintendo", "super-famicom", "super-nintendo-entertainment-system", "sfam"],
        core_folder_name: Some("Nintendo - Super Nintendo Entertainment System"),
    },
    PlatformDef {
        slug: "n64",
        display_name: "Nintendo 64",
        folder_aliases: &["n64"],
        romm_aliases: &["nintendo-64"],
        core_folder_name: Some("Nintendo - Nintendo 64"),
    },
    PlatformDef {
        slug: "nds",
        display_name: "Nintendo DS",
        folder_aliases: &["nds"],
        romm_aliases: &["nintendo-ds"],
        core_folder_name: Some("Nintendo - Nintendo DS"),
    },
    PlatformDef {
        slug: "3ds",
        display_name: "Nintendo 3DS",
        folder_aliases: &["3ds"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "gamecube",
        display_name: "GameCube",
        folder_aliases: &["gamecube", "gc"],
        romm_aliases: &["ngc"],
        core_folder_name: Some("Nintendo - GameCube"),
    },
    PlatformDef {
        slug: "wii",
        display_name: "Wii",
        folder_aliases: &["wii"],
        romm_aliases: &[],
        core_folder_name: Some("Nintendo - Wii"),
    },
    PlatformDef {
        slug: "wiiu",
        display_name: "Wii U",
        folder_aliases: &["wiiu"],
        romm_aliases: &["wii-u"],
        core_folder_name: Some("Nintendo - Wii U"),
    },
    PlatformDef {
        slug: "switch",
        display_name: "Nintendo Switch",
        folder_aliases: &["switch"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "switch2",
        display_name: "Nintendo Switch 2",
        folder_aliases: &["switch2"],
        romm_aliases: &["switch-2"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "dsi",
        display_name: "Nintendo DSi",
        folder_aliases: &["dsi"],
        romm_aliases: &["nintendo-dsi"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "n3ds",
        display_name: "New Nintendo 3DS",
        folder_aliases: &["n3ds", "new3ds"],
        romm_aliases: &["new-nintendo-3ds"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "vb",
        display_name: "Virtual Boy",
        folder_aliases: &["virtualboy", "vb"],
        romm_aliases: &["virtual-boy", "virtualboy"],
        core_folder_name: Some("Nintendo - Virtual Boy"),
    },
    PlatformDef {
        slug: "pokemini",
        display_name: "Pokemon Mini",
        folder_aliases: &["pokemini"],
        romm_aliases: &["pokemon-mini"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "sufami",
        display_name: "Sufami Turbo",
        folder_aliases: &["sufami"],
        romm_aliases: &["sufami-turbo"],
        core_folder_name: None,
    },
    // ── Sony ──
    PlatformDef {
        slug: "psx",
        display_name: "PlayStation",
        folder_aliases: &["psx", "ps", "ps1"],
        romm_aliases: &["ps", "playstation", "ps1"],
        core_folder_name: Some("Sony - PlayStation"),
    },
    PlatformDef {
        slug: "ps2",
        display_name: "PlayStation 2",
        folder_aliases: &["ps2"],
        romm_aliases: &["playstation-2"],
        core_folder_name: Some("Sony - PlayStation 2"),
    },
    PlatformDef {
        slug: "psp",
        display_name: "PlayStation Portable",
        folder_aliases: &["psp"],
        romm_aliases: &["playstation-portable"],
        core_folder_name: Some("Sony - PlayStation Portable"),
    },
    PlatformDef {
        slug: "ps3",
        display_name: "PlayStation 3",
        folder_aliases: &["ps3"],
        romm_aliases: &["playstation-3"],
        core_folder_name: Some("Sony - PlayStation 3"),
    },
    PlatformDef {
        slug: "ps4",
        display_name: "PlayStation 4",
        folder_aliases: &["ps4"],
        romm_aliases: &["playstation-4"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "ps5",
        display_name: "PlayStation 5",
        folder_aliases: &["ps5"],
        romm_aliases: &["playstation-5"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "psvita",
        display_name: "PlayStation Vita",
        folder_aliases: &["psvita", "vita"],
        romm_aliases: &["playstation-vita"],
        core_folder_name: None,
    },
    // ── Microsoft ──
    PlatformDef {
        slug: "xbox",
        display_name: "Xbox",
        folder_aliases: &["xbox"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "xbox360",
        display_name: "Xbox 360",
        folder_aliases: &["xbox360"],
        romm_aliases: &["xbox-360"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "xboxone",
        display_name: "Xbox One",
        folder_aliases: &["xboxone"],
        romm_aliases: &["xbox-one"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "xboxseriesx",
        display_name: "Xbox Series X/S",
        folder_aliases: &["xboxseriesx"],
        romm_aliases: &["series-x-s"],
        core_folder_name: None,
    },
    // ── Sega ──
    PlatformDef {
        slug: "genesis",
        display_name: "Sega Genesis / Mega Drive",
        folder_aliases: &["genesis", "megadrive", "md"],
        romm_aliases: &["megadrive", "mega-drive", "sega-genesis", "mega-drive-slash-genesis"],
        core_folder_name: Some("Sega - Mega Drive - Genesis"),
    },
    PlatformDef {
        slug: "segacd",
        display_name: "Sega CD",
        folder_aliases: &["segacd"],
        romm_aliases: &["sega-cd"],
        core_folder_name: Some("Sega - Mega-CD - Sega CD"),
    },
    PlatformDef {
        slug: "saturn",
        display_name: "Sega Saturn",
        folder_aliases: &["saturn"],
        romm_aliases: &["sega-saturn"],
        core_folder_name: Some("Sega - Saturn"),
    },
    PlatformDef {
        slug: "dreamcast",
        display_name: "Dreamcast",
        folder_aliases: &["dreamcast", "dc"],
        romm_aliases: &["sega-dreamcast", "dc"],
        core_folder_name: Some("Sega - Dreamcast"),
    },
    PlatformDef {
        slug: "gamegear",
        display_name: "Game Gear",
        folder_aliases: &["gamegear", "gg"],
        romm_aliases: &["game-gear"],
        core_folder_name: Some("Sega - Game Gear"),
    },
    PlatformDef {
        slug: "mastersystem",
        display_name: "Master System",
        folder_aliases: &["mastersystem", "ms", "sms"],
        romm_aliases: &["master-system", "sega-master-system", "sms"],
        core_folder_name: Some("Sega - Master System - Mark III"),
    },
    PlatformDef {
        slug: "sg1000",
        display_name: "SG-1000",
        folder_aliases: &["sg-1000", "sg1000", "sg"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "sega32",
        display_name: "Sega 32X",
        folder_aliases: &["sega32", "32x"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    // ── Capcom Arcade ──
    PlatformDef {
        slug: "cps1",
        display_name: "Capcom Play System",
        folder_aliases: &["cps1"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "cps2",
        display_name: "Capcom Play System 2",
        folder_aliases: &["cps2"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "cps3",
        display_name: "Capcom Play System 3",
        folder_aliases: &["cps3"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    // ── SNK / Arcade ──
    PlatformDef {
        slug: "neogeo",
        display_name: "Neo Geo",
        folder_aliases: &["neogeo"],
        romm_aliases: &["neo-geo-aes", "neogeoaes", "neo-geo-mvs", "neogeomvs"],
        core_folder_name: Some("SNK - Neo Geo"),
    },
    PlatformDef {
        slug: "arcade",
        display_name: "Arcade",
        folder_aliases: &["arcade", "mame", "fbneo", "fba"],
        romm_aliases: &[],
        core_folder_name: Some("MAME"),
    },
    PlatformDef {
        slug: "ngp",
        display_name: "Neo Geo Pocket",
        folder_aliases: &["ngp"],
        romm_aliases: &["neo-geo-pocket"],
        core_folder_name: Some("SNK - Neo Geo Pocket"),
    },
    PlatformDef {
        slug: "ngpc",
        display_name: "Neo Geo Pocket Color",
        folder_aliases: &["ngpc"],
        romm_aliases: &["neo-geo-pocket-color"],
        core_folder_name: Some("SNK - Neo Geo Pocket Color"),
    },
    PlatformDef {
        slug: "neocd",
        display_name: "Neo Geo CD",
        folder_aliases: &["neocd"],
        romm_aliases: &["neo-geo-cd"],
        core_folder_name: None,
    },
    // ── NEC ──
    PlatformDef {
        slug: "pce",
        display_name: "TurboGrafx-16 / PC Engine",
        folder_aliases: &["pcengine", "pce", "tg16"],
        romm_aliases: &["turbografx-16", "tg16", "pc-engine"],
        core_folder_name: Some("NEC - PC Engine - TurboGrafx 16"),
    },
    PlatformDef {
        slug: "pcecd",
        display_name: "TurboGrafx-CD",
        folder_aliases: &["pcenginecd", "pcecd", "tgcd"],
        romm_aliases: &["turbografx-cd", "tg-cd", "pc-engine-cd"],
        core_folder_name: Some("NEC - PC Engine CD - TurboGrafx-CD"),
    },
    PlatformDef {
        slug: "sgfx",
        display_name: "SuperGrafx",
        folder_aliases: &["supergrafx", "sgfx"],
        romm_aliases: &["supergrafx"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "pcfx",
        display_name: "PC-FX",
        folder_aliases: &["pcfx"],
        romm_aliases: &["pc-fx"],
        core_folder_name: None,
    },
    // ── Atari ──
    PlatformDef {
        slug: "atari2600",
        display_name: "Atari 2600",
        folder_aliases: &["atari2600", "atari", "a26"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "atari5200",
        display_name: "Atari 5200",
        folder_aliases: &["atari5200"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "atari7800",
        display_name: "Atari 7800",
        folder_aliases: &["atari7800", "a78"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "lynx",
        display_name: "Atari Lynx",
        folder_aliases: &["lynx"],
        romm_aliases: &["atari-lynx"],
        core_folder_name: Some("Atari - Lynx"),
    },
    PlatformDef {
        slug: "atarist",
        display_name: "Atari ST",
        folder_aliases: &["atarist"],
        romm_aliases: &["atari-st"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "jaguar",
        display_name: "Atari Jaguar",
        folder_aliases: &["jaguar"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "atari8bit",
        display_name: "Atari 8-bit",
        folder_aliases: &["atari8bit", "atari800"],
        romm_aliases: &["atari800"],
        core_folder_name: None,
    },
    // ── Bandai ──
    PlatformDef {
        slug: "ws",
        display_name: "WonderSwan",
        folder_aliases: &["wonderswan", "ws"],
        romm_aliases: &["wonderswan"],
        core_folder_name: Some("Bandai - WonderSwan"),
    },
    PlatformDef {
        slug: "wsc",
        display_name: "WonderSwan Color",
        folder_aliases: &["wonderswancolor", "wsc"],
        romm_aliases: &["wonderswan-color"],
        core_folder_name: Some("Bandai - WonderSwan Color"),
    },
    // ── Other consoles ──
    PlatformDef {
        slug: "colecovision",
        display_name: "ColecoVision",
        folder_aliases: &["coleco", "colecovision", "col"],
        romm_aliases: &[],
        core_folder_name: Some("Coleco - ColecoVision"),
    },
    PlatformDef {
        slug: "intellivision",
        display_name: "Intellivision",
        folder_aliases: &["intellivision", "int"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "vectrex",
        display_name: "Vectrex",
        folder_aliases: &["vectrex"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "channelf",
        display_name: "Channel F",
        folder_aliases: &["channelf"],
        romm_aliases: &["fairchild-channel-f"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "3do",
        display_name: "3DO Interactive Multiplayer",
        folder_aliases: &["3do"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "cdi",
        display_name: "Philips CD-i",
        folder_aliases: &["cdi"],
        romm_aliases: &["philips-cd-i"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "odyssey2",
        display_name: "Odyssey 2 / Videopac",
        folder_aliases: &["odyssey2"],
        romm_aliases: &["odyssey-2"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "megaduck",
        display_name: "Mega Duck",
        folder_aliases: &["megaduck"],
        romm_aliases: &["mega-duck-slash-cougar-boy"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "supervision",
        display_name: "Watara Supervision",
        folder_aliases: &["supervision"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    // ── Computers ──
    PlatformDef {
        slug: "win",
        display_name: "PC (Windows)",
        folder_aliases: &["win", "windows"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "msx",
        display_name: "MSX",
        folder_aliases: &["msx"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "msx2",
        display_name: "MSX2",
        folder_aliases: &["msx2"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "dos",
        display_name: "DOS",
        folder_aliases: &["dos"],
        romm_aliases: &["ms-dos", "msdos"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "cpc",
        display_name: "Amstrad CPC",
        folder_aliases: &["amstradcpc", "cpc"],
        romm_aliases: &["acpc", "amstrad-cpc"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "zxspectrum",
        display_name: "ZX Spectrum",
        folder_aliases: &["zxspectrum"],
        romm_aliases: &["zx-spectrum", "zxspectrum", "zxs"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "c64",
        display_name: "Commodore 64",
        folder_aliases: &["c64"],
        romm_aliases: &["commodore-64"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "amiga",
        display_name: "Amiga",
        folder_aliases: &["amiga"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "scummvm",
        display_name: "ScummVM",
        folder_aliases: &["scummvm"],
        romm_aliases: &[],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "vic20",
        display_name: "VIC-20",
        folder_aliases: &["vic20"],
        romm_aliases: &["vic-20"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "x68000",
        display_name: "Sharp X68000",
        folder_aliases: &["x68000"],
        romm_aliases: &["sharp-x68000"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "pc98",
        display_name: "PC-9800 Series",
        folder_aliases: &["pc98"],
        romm_aliases: &["pc-9800-series"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "trs80",
        display_name: "TRS-80",
        folder_aliases: &["trs80"],
        romm_aliases: &["trs-80"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "ti99",
        display_name: "TI-99",
        folder_aliases: &["ti99"],
        romm_aliases: &["ti-99"],
        core_folder_name: None,
    },
    // ── Fantasy Consoles ──
    PlatformDef {
        slug: "tic80",
        display_name: "TIC-80",
        folder_aliases: &["tic80", "tic-80"],
        romm_aliases: &["tic-80"],
        core_folder_name: None,
    },
    PlatformDef {
        slug: "pico8",
        display_name: "PICO-8",
        folder_aliases: &["pico8", "pico-8"],
        romm_aliases: &["pico"],
        core_folder_name: None,
    },
];

// ── Derived lookup maps ──

/// Folder name (lowercase) → canonical slug.
static FOLDER_MAP: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    for p in PLATFORMS {
        // The slug itself is always a valid folder name
        m.insert(p.slug, p.slug);
        for &alias in p.folder_aliases {
            m.insert(alias, p.slug);
        }
    }
    m
});

/// ROMM slug (lowercase) → canonical slug.
static ROMM_MAP: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    for p in PLATFORMS {
        for &alias in p.romm_aliases {
            m.insert(alias, p.slug);
        }
    }
    m
});

/// Canonical slug → display name. This is the hard-coded fallback mapping
/// consulted by the catalog cache's platform-mapping merge: server-supplied
/// entries only override it when they are strictly more informative than
/// what's here.
static DISPLAY_MAP: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    PLATFORMS.iter().map(|p| (p.slug, p.display_name)).collect()
});

/// Canonical slug → core-name-scheme save/state folder name.
static CORE_FOLDER_MAP: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    PLATFORMS
        .iter()
        .filter_map(|p| p.core_folder_name.map(|d| (p.slug, d)))
        .collect()
});

// ── Public convenience functions ──

/// Resolve a folder name to a canonical platform slug.
pub fn resolve_folder(name: &str) -> Option<&'static str> {
    FOLDER_MAP.get(name).copied()
}

/// Check if a folder name is a known platform.
pub fn is_known_folder(name: &str) -> bool {
    FOLDER_MAP.contains_key(name)
}

/// Resolve a server (RomM) platform slug to our canonical slug.
/// Returns the mapped slug if one exists, otherwise returns the server's
/// slug as-is (server slugs are already stable/lowercase/hyphenated, so an
/// unmapped one is still usable directly).
pub fn resolve_server_slug(server_slug: &str) -> String {
    let lower = server_slug.to_lowercase();
    if let Some(&canonical) = ROMM_MAP.get(lower.as_str()) {
        canonical.to_string()
    } else {
        lower
    }
}

/// Get the fallback display name for a canonical platform slug.
pub fn display_name(slug: &str) -> Option<&'static str> {
    DISPLAY_MAP.get(slug).copied()
}

/// Get the core-name-scheme save/state folder name for a canonical platform
/// slug (e.g. `snes` → `Nintendo - Super Nintendo Entertainment System`).
pub fn core_folder_name(slug: &str) -> Option<&'static str> {
    CORE_FOLDER_MAP.get(slug).copied()
}

/// The hard-coded slug → display-name fallback table (§3), owned, for the
/// catalog cache's platform-mapping merge.
pub fn fallback_mapping() -> HashMap<String, String> {
    PLATFORMS
        .iter()
        .map(|p| (p.slug.to_string(), p.display_name.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_server_slug_maps_known_aliases() {
        assert_eq!(resolve_server_slug("super-nintendo"), "snes");
        assert_eq!(resolve_server_slug("Super-Nintendo"), "snes");
        assert_eq!(resolve_server_slug("game-boy-advance"), "gba");
    }

    #[test]
    fn resolve_server_slug_passes_through_unknown_slugs() {
        assert_eq!(resolve_server_slug("some-future-platform"), "some-future-platform");
    }

    #[test]
    fn resolve_folder_matches_slug_and_aliases() {
        assert_eq!(resolve_folder("snes"), Some("snes"));
        assert_eq!(resolve_folder("sfc"), Some("snes"));
        assert_eq!(resolve_folder("famicom"), Some("nes"));
        assert_eq!(resolve_folder("not-a-platform"), None);
    }

    #[test]
    fn is_known_folder_reflects_folder_map() {
        assert!(is_known_folder("gba"));
        assert!(!is_known_folder("not-a-platform"));
    }

    #[test]
    fn core_folder_name_only_set_for_core_scheme_platforms() {
        assert_eq!(core_folder_name("snes"), Some("Nintendo - Super Nintendo Entertainment System"));
        assert_eq!(core_folder_name("fds"), None);
    }

    #[test]
    fn display_name_looks_up_canonical_slug() {
        assert_eq!(display_name("gbc"), Some("Game Boy Color"));
        assert_eq!(display_name("not-a-platform"), None);
    }

    #[test]
    fn fallback_mapping_contains_every_platform() {
        let map = fallback_mapping();
        assert_eq!(map.len(), PLATFORMS.len());
        assert_eq!(map.get("snes").map(String::as_str), Some("SNES / Super Famicom"));
    }
}
