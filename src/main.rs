//! `romm-syncd`: the headless daemon binary. Loads settings, authenticates
//! against the catalog server, discovers the local emulator installation,
//! starts the engine, and runs until interrupted.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use romm_sync::engine::{Engine, EngineConfig, DEFAULT_COLLECTION_SYNC_PERIOD};
use romm_sync::{AppResult, CatalogCache, CatalogClient, HeadlessHooks, HostHooks, Settings};

#[derive(Parser, Debug)]
#[command(name = "romm-syncd", about = "RomM-compatible ROM/save/state sync daemon")]
struct Cli {
    /// Directory holding settings.ini, cache/, and autosync.lock. Defaults
    /// to the platform config dir under "romm-sync".
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Override the discovered emulator executable/config path.
    #[arg(long)]
    emulator_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> AppResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config_dir = cli
        .config_dir
        .or_else(|| dirs::config_dir().map(|d| d.join("romm-sync")))
        .unwrap_or_else(|| PathBuf::from(".romm-sync"));
    std::fs::create_dir_all(&config_dir)?;

    let mut settings = Settings::load(&config_dir)?;
    log::info!("romm-syncd starting, config dir {}", config_dir.display());

    let url = settings.get("RomM", "url", "");
    if url.is_empty() {
        log::error!("RomM.url is not configured in settings.ini; nothing to sync");
        return Ok(());
    }
    let username = settings.get("RomM", "username", "");
    let password = settings.get("RomM", "password", "");

    let client = Arc::new(CatalogClient::new(url)?);
    client.authenticate(&username, &password).await?;
    log::info!("authenticated against the catalog server");

    let device_id = ensure_device_registered(&client, &mut settings).await?;
    let policy_raw = settings.get("AutoSync", "overwrite_behavior", "smart");
    let policy = parse_policy(&policy_raw);
    let hooks: Arc<dyn HostHooks> = Arc::new(HeadlessHooks::new(Some(device_id), policy));

    let installation = romm_sync::emulator::discover_installation(cli.emulator_path.as_deref());
    if installation.save_root.is_none() && installation.state_root.is_none() {
        hooks.log("could not discover any save/state directory; file sync will be idle");
    }

    refresh_catalog_mirror(&client, &config_dir).await;

    let selected: HashSet<String> = settings
        .get("Collections", "selected_for_sync", "")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let auto_download = settings.get_bool("Collections", "auto_download", true);
    let auto_delete = settings.get_bool("Collections", "auto_delete", false);
    let collection_sync_interval = std::time::Duration::from_secs(settings.get_u64(
        "Collections",
        "sync_interval",
        DEFAULT_COLLECTION_SYNC_PERIOD.as_secs(),
    ));
    let rom_directory = settings.get(
        "Download",
        "rom_directory",
        &dirs::home_dir()
            .unwrap_or_default()
            .join("RomMSync/roms")
            .to_string_lossy(),
    );

    let engine_config = EngineConfig {
        lock_path: config_dir.join("autosync.lock"),
        instance_label: "romm-syncd".to_string(),
        rom_directory: PathBuf::from(rom_directory),
        selected_collections: selected,
        auto_download,
        auto_delete,
        collection_sync_interval,
    };

    let engine = Engine::start(engine_config, &config_dir, client, installation, hooks.clone()).await?;
    log::info!("engine started");

    wait_for_shutdown_signal().await;
    log::info!("shutting down");
    engine.shutdown().await;
    Ok(())
}

/// Populate the on-disk catalog mirror (C3) with a full paginated fetch
/// before the engine starts, so a fresh install or an expired cache doesn't
/// leave the filename index empty until some unrelated later sync loop
/// happens to refresh it. Failure only logs: the engine still runs against
/// whatever cache (possibly absent) is already on disk.
async fn refresh_catalog_mirror(client: &CatalogClient, config_dir: &std::path::Path) {
    log::info!("fetching full catalog mirror");
    let roms = match client.fetch_all_roms(|progress| {
        log::debug!("catalog mirror: {} pages fetched", progress.pages_done);
    }).await {
        Ok(roms) => roms,
        Err(e) => {
            log::warn!("catalog mirror fetch failed, continuing with existing cache: {e}");
            return;
        }
    };

    let mut cache = match CatalogCache::load(config_dir) {
        Ok(cache) => cache,
        Err(e) => {
            log::warn!("could not load catalog cache for refresh: {e}");
            return;
        }
    };
    let count = roms.len();
    cache.set_games(roms);
    cache.save();
    log::info!("catalog mirror refreshed: {count} games");
}

async fn ensure_device_registered(client: &CatalogClient, settings: &mut Settings) -> AppResult<String> {
    let existing = settings.get("Device", "device_id", "");
    if !existing.is_empty() {
        return Ok(existing);
    }

    let name = settings.get("Device", "device_name", "romm-sync");
    let platform = settings.get("Device", "device_platform", std::env::consts::OS);
    let client_name = settings.get("Device", "client", "romm-sync");
    let client_version = settings.get("Device", "client_version", env!("CARGO_PKG_VERSION"));
    let hostname = name.clone();

    let device_id = client
        .register_device(&name, &platform, &client_name, &client_version, &hostname)
        .await?;
    settings.set("Device", "device_id", &device_id)?;
    log::info!("registered device {device_id}");
    Ok(device_id)
}

fn parse_policy(raw: &str) -> romm_sync::models::ConflictPolicy {
    use romm_sync::models::ConflictPolicy;
    match raw {
        "always_local" => ConflictPolicy::AlwaysLocal,
        "always_server" => ConflictPolicy::AlwaysServer,
        "ask" => ConflictPolicy::Ask,
        _ => ConflictPolicy::Smart,
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
