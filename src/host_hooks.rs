//! The abstract boundary between the sync engine and whatever embeds it.
//!
//! §9 of the design notes breaks the engine↔front-end↔settings cycle by
//! making the engine depend on this small trait rather than on a concrete
//! GUI, settings store, or IPC layer. A headless daemon, a Tauri front-end,
//! or a test harness each provide their own implementation.

use chrono::{DateTime, Utc};

use crate::models::ConflictPolicy;

/// Host-provided callbacks the engine needs but must not own.
pub trait HostHooks: Send + Sync {
    /// A user-relevant log line (upload accepted, conflict, download, etc).
    /// Implementations typically also emit this through `log::info!` on
    /// their own, so this is for channels `log` doesn't reach (a GUI toast,
    /// an IPC status line).
    fn log(&self, message: &str);

    /// Ask the user which side wins a conflict the `Ask` policy surfaces.
    /// Returns `true` if local should be kept, `false` if the server's copy
    /// should be downloaded. Blocks the calling reconciler until answered.
    fn ask_conflict(&self, local_ts: DateTime<Utc>, server_ts: DateTime<Utc>) -> bool;

    /// This installation's registered device ID, if one has been assigned.
    fn device_id(&self) -> Option<String>;

    /// The currently configured conflict-resolution policy.
    fn overwrite_policy(&self) -> ConflictPolicy;
}

/// A non-interactive host for headless operation. `Ask` is resolved to
/// `Smart` at startup per the open question in §9: a synchronous prompt
/// has no meaning without a front-end attached.
pub struct HeadlessHooks {
    device_id: Option<String>,
    policy: ConflictPolicy,
}

impl HeadlessHooks {
    pub fn new(device_id: Option<String>, policy: ConflictPolicy) -> Self {
        let resolved = if policy == ConflictPolicy::Ask {
            log::warn!("overwrite_behavior=ask has no meaning headless; resolving to Smart");
            ConflictPolicy::Smart
        } else {
            policy
        };
        Self {
            device_id,
            policy: resolved,
        }
    }
}

impl HostHooks for HeadlessHooks {
    fn log(&self, message: &str) {
        log::info!("{message}");
    }

    fn ask_conflict(&self, _local_ts: DateTime<Utc>, _server_ts: DateTime<Utc>) -> bool {
        // Unreachable in practice since `new` never stores `Ask`, but a safe
        // default (prefer local) if a caller bypasses the constructor.
        true
    }

    fn device_id(&self) -> Option<String> {
        self.device_id.clone()
    }

    fn overwrite_policy(&self) -> ConflictPolicy {
        self.policy
    }
}
