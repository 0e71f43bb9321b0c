use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::plugin::synchronizer::CycleReport;

/// Host hooks invoked by the monitor. Both default to no-ops.
pub trait PluginListener: Send + Sync {
    /// A loaded plugin's archive changed; tear down its in-memory state.
    fn on_plugin_stale(&self, _canonical_name: &str) {}

    /// A synchronization pass completed.
    fn on_cycle_complete(&self, _report: &CycleReport) {}
}

/// Monitor-visible plugin state: whether a pass ever completed, and who to notify.
#[derive(Default)]
pub struct PluginRegistry {
    executed: AtomicBool,
    listeners: RwLock<Vec<Arc<dyn PluginListener>>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("executed", &self.is_executed())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once at least one synchronization pass has completed. Not persisted.
    pub fn is_executed(&self) -> bool {
        self.executed.load(Ordering::Acquire)
    }

    pub fn add_listener(&self, listener: Arc<dyn PluginListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Ask the host to unload a plugin whose archive was replaced. The exploded
    /// directory is left in place; it is re-extracted once the host removes it.
    pub fn unload_plugin(&self, canonical_name: &str) {
        tracing::debug!("unloading plugin '{canonical_name}'...");
        for listener in self.snapshot() {
            listener.on_plugin_stale(canonical_name);
        }
    }

    /// Record a completed pass and notify listeners.
    pub fn fire_plugins_monitored(&self, report: &CycleReport) {
        self.executed.store(true, Ordering::Release);
        for listener in self.snapshot() {
            listener.on_cycle_complete(report);
        }
    }

    // Listeners run without the lock held so they may register others.
    fn snapshot(&self) -> Vec<Arc<dyn PluginListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
