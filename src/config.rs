//! Settings store (C1): a sectioned INI file at `<config>/settings.ini`,
//! hand-parsed in the same line-oriented style as the emulator-config
//! readers in `emulator::discovery`, with `RomM.username`/`RomM.password`
//! encrypted at rest.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key};
use base64::Engine;
use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{AppError, AppResult};

const SENSITIVE_KEYS: &[(&str, &str)] = &[("RomM", "username"), ("RomM", "password")];

/// Sectioned key/value store backing `settings.ini`.
pub struct Settings {
    path: PathBuf,
    sections: BTreeMap<String, BTreeMap<String, String>>,
    cipher: Aes256Gcm,
}

impl Settings {
    /// Load settings from `config_dir/settings.ini`, creating defaults on
    /// first run.
    pub fn load(config_dir: &Path) -> AppResult<Self> {
        std::fs::create_dir_all(config_dir)?;
        let path = config_dir.join("settings.ini");
        let cipher = Aes256Gcm::new(&derive_key());

        let mut settings = Self {
            path: path.clone(),
            sections: BTreeMap::new(),
            cipher,
        };

        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            settings.sections = parse_ini(&text);
        } else {
            settings.sections = default_sections();
            settings.save()?;
        }
        settings.migrate()?;
        Ok(settings)
    }

    /// Ensure sections/keys introduced by later versions are present.
    fn migrate(&mut self) -> AppResult<()> {
        let mut modified = false;
        for (section, defaults) in default_sections() {
            let existing = self.sections.entry(section).or_insert_with(|| {
                modified = true;
                BTreeMap::new()
            });
            for (key, value) in defaults {
                existing.entry(key).or_insert_with(|| {
                    modified = true;
                    value
                });
            }
        }
        if modified {
            self.save()?;
        }
        Ok(())
    }

    /// Read a value, transparently decrypting sensitive fields.
    pub fn get(&self, section: &str, key: &str, fallback: &str) -> String {
        let raw = self
            .sections
            .get(section)
            .and_then(|s| s.get(key))
            .cloned();
        match raw {
            Some(v) if v.is_empty() => fallback.to_string(),
            Some(v) if is_sensitive(section, key) => self.decrypt(&v).unwrap_or(v),
            Some(v) => v,
            None => fallback.to_string(),
        }
    }

    pub fn get_bool(&self, section: &str, key: &str, fallback: bool) -> bool {
        match self.get(section, key, if fallback { "true" } else { "false" }).as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => fallback,
        }
    }

    pub fn get_u64(&self, section: &str, key: &str, fallback: u64) -> u64 {
        self.get(section, key, &fallback.to_string())
            .parse()
            .unwrap_or(fallback)
    }

    /// Write a value, encrypting sensitive fields, then persist to disk.
    pub fn set(&mut self, section: &str, key: &str, value: &str) -> AppResult<()> {
        let stored = if is_sensitive(section, key) && !value.is_empty() {
            self.encrypt(value)
        } else {
            value.to_string()
        };
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), stored);
        self.save()
    }

    /// Write-temp, rename, matching the catalog cache's persistence pattern.
    pub fn save(&self) -> AppResult<()> {
        let serialized = render_ini(&self.sections);
        let tmp = self.path.with_extension("ini.tmp");
        {
            let mut f = std::fs::File::create(&tmp)?;
            f.write_all(serialized.as_bytes())?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn encrypt(&self, plaintext: &str) -> String {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        match self.cipher.encrypt(&nonce, plaintext.as_bytes()) {
            Ok(ciphertext) => {
                let mut payload = nonce.to_vec();
                payload.extend_from_slice(&ciphertext);
                base64::engine::general_purpose::STANDARD.encode(payload)
            }
            Err(_) => plaintext.to_string(),
        }
    }

    fn decrypt(&self, stored: &str) -> Option<String> {
        let payload = base64::engine::general_purpose::STANDARD
            .decode(stored)
            .ok()?;
        if payload.len() < 12 {
            return None;
        }
        let (nonce, ciphertext) = payload.split_at(12);
        let plaintext = self
            .cipher
            .decrypt(nonce.into(), ciphertext)
            .ok()?;
        String::from_utf8(plaintext).ok()
    }
}

fn is_sensitive(section: &str, key: &str) -> bool {
    SENSITIVE_KEYS.iter().any(|&(s, k)| s == section && k == key)
}

/// Derive a symmetric key from local user+host identity, matching the
/// "key derived from user+host identity" requirement without depending on
/// any particular credential-storage backend (out of scope for this crate).
fn derive_key() -> Key<Aes256Gcm> {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = hostname();
    let material = format!("{user}-{host}");

    let hk = Hkdf::<Sha256>::new(None, material.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(b"romm-sync settings encryption", &mut okm)
        .expect("32 bytes is a valid HKDF output length");
    Key::<Aes256Gcm>::clone_from_slice(&okm)
}

fn hostname() -> String {
    hostname_inner().unwrap_or_else(|| "localhost".to_string())
}

#[cfg(unix)]
fn hostname_inner() -> Option<String> {
    let output = std::process::Command::new("hostname").output().ok()?;
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

#[cfg(not(unix))]
fn hostname_inner() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}

fn default_sections() -> Vec<(String, BTreeMap<String, String>)> {
    let home = dirs::home_dir().unwrap_or_default();
    let mut romm = BTreeMap::new();
    romm.insert("url".into(), String::new());
    romm.insert("username".into(), String::new());
    romm.insert("password".into(), String::new());
    romm.insert("remember_credentials".into(), "false".into());
    romm.insert("auto_connect".into(), "false".into());

    let mut download = BTreeMap::new();
    download.insert(
        "rom_directory".into(),
        home.join("RomMSync/roms").to_string_lossy().into_owned(),
    );
    download.insert(
        "save_directory".into(),
        home.join("RomMSync/saves").to_string_lossy().into_owned(),
    );

    let mut bios = BTreeMap::new();
    bios.insert("verify_on_launch".into(), "false".into());
    bios.insert("backup_existing".into(), "true".into());

    let mut autosync = BTreeMap::new();
    autosync.insert("auto_enable_on_connect".into(), "true".into());
    autosync.insert("overwrite_behavior".into(), "smart".into());

    let mut system = BTreeMap::new();
    system.insert("autostart".into(), "false".into());

    let mut collections = BTreeMap::new();
    collections.insert("sync_interval".into(), "120".into());
    collections.insert("selected_for_sync".into(), String::new());
    collections.insert("auto_download".into(), "true".into());
    collections.insert("auto_delete".into(), "false".into());
    collections.insert("auto_sync_enabled".into(), "false".into());

    let mut device = BTreeMap::new();
    device.insert("device_id".into(), String::new());
    device.insert("device_name".into(), hostname());
    device.insert("device_platform".into(), std::env::consts::OS.into());
    device.insert("client".into(), "romm-sync".into());
    device.insert("client_version".into(), env!("CARGO_PKG_VERSION").into());
    device.insert("sync_enabled".into(), "true".into());

    vec![
        ("RomM".into(), romm),
        ("Download".into(), download),
        ("BIOS".into(), bios),
        ("AutoSync".into(), autosync),
        ("System".into(), system),
        ("Collections".into(), collections),
        ("Device".into(), device),
    ]
}

fn parse_ini(text: &str) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut sections = BTreeMap::new();
    let mut current: Option<String> = None;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].to_string();
            sections.entry(name.clone()).or_insert_with(BTreeMap::new);
            current = Some(name);
            continue;
        }
        let Some(section) = current.as_ref() else {
            continue;
        };
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        sections
            .entry(section.clone())
            .or_insert_with(BTreeMap::new)
            .insert(key.trim().to_string(), value.trim().to_string());
    }

    sections
}

fn render_ini(sections: &BTreeMap<String, BTreeMap<String, String>>) -> String {
    let mut out = String::new();
    for (section, entries) in sections {
        out.push('[');
        out.push_str(section);
        out.push_str("]\n");
        for (key, value) in entries {
            out.push_str(key);
            out.push_str(" = ");
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plain_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::load(dir.path()).unwrap();
        settings.set("RomM", "url", "https://romm.example.com").unwrap();
        assert_eq!(settings.get("RomM", "url", ""), "https://romm.example.com");

        let reloaded = Settings::load(dir.path()).unwrap();
        assert_eq!(reloaded.get("RomM", "url", ""), "https://romm.example.com");
    }

    #[test]
    fn encrypts_sensitive_fields_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::load(dir.path()).unwrap();
        settings.set("RomM", "password", "hunter2").unwrap();

        let on_disk = std::fs::read_to_string(dir.path().join("settings.ini")).unwrap();
        assert!(!on_disk.contains("hunter2"));
        assert_eq!(settings.get("RomM", "password", ""), "hunter2");
    }

    #[test]
    fn default_sections_are_created_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.get("Collections", "sync_interval", "0"), "120");
        assert_eq!(settings.get("AutoSync", "overwrite_behavior", ""), "smart");
    }

    #[test]
    fn migrates_missing_keys_into_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("settings.ini"), "[RomM]\nurl = old\n").unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.get("RomM", "url", ""), "old");
        assert_eq!(settings.get("Device", "sync_enabled", ""), "true");
    }
}
