//! ROM, save, and save-state sync engine for a RomM-compatible catalog
//! server: the catalog client and cache, emulator discovery, the
//! filesystem/upload/download/launch machinery, and the ambient
//! configuration, error, and status-reporting layers around them.

pub mod catalog;
pub mod config;
pub mod emulator;
pub mod engine;
pub mod error;
pub mod host_hooks;
pub mod models;
pub mod platform_registry;
pub mod status;

pub use catalog::{CatalogCache, CatalogClient};
pub use config::Settings;
pub use engine::{Engine, EngineConfig};
pub use error::{AppError, AppResult};
pub use host_hooks::{HeadlessHooks, HostHooks};
