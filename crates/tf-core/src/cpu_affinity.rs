//! CPU affinity for the tick producer thread.
//!
//! The producer runs on its own OS thread and publishes at a fixed cadence;
//! pinning it keeps the cadence steady when connection threads are busy.
//! Wraps the `core_affinity` crate.

use tracing::{info, warn};

/// Pin the calling thread to `core_id`. Returns `false` if the core does not
/// exist or the OS refused.
pub fn pin_current_thread(core_id: usize, role: &str) -> bool {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    let Some(core) = core_ids.get(core_id) else {
        warn!(role, core_id, available = core_ids.len(), "requested CPU core not available");
        return false;
    };

    let ok = core_affinity::set_for_current(*core);
    if ok {
        info!(role, core_id, "thread pinned");
    } else {
        warn!(role, core_id, "failed to pin thread");
    }
    ok
}

/// Pin the calling thread if a core is configured; no-op for `None`.
pub fn maybe_pin(core_id: Option<usize>, role: &str) {
    if let Some(id) = core_id {
        pin_current_thread(id, role);
    }
}
