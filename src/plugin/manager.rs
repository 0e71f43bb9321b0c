use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::model::config::AppConfig;
use crate::plugin::cleanup::RetryPolicy;
use crate::plugin::error::Result;
use crate::plugin::monitor::PluginMonitor;
use crate::plugin::registry::{PluginListener, PluginRegistry};
use crate::plugin::synchronizer::{CycleReport, DirectorySynchronizer};

/// Owns the plugins directory and the monitor that keeps it exploded.
pub struct PluginManager {
    plugins_dir: PathBuf,
    registry: Arc<PluginRegistry>,
    monitor: PluginMonitor,
}

impl PluginManager {
    /// Create the manager without starting it, so the host can register listeners first.
    pub fn new(config: &AppConfig) -> Self {
        let plugins_dir = config.plugins_path();
        let registry = Arc::new(PluginRegistry::new());

        let synchronizer = DirectorySynchronizer::new(&plugins_dir)
            .with_retry(RetryPolicy {
                retries: config.monitor.delete_retries,
                interval: config.monitor.delete_retry_interval(),
            })
            .with_extra_plugin_dirs(config.extra_plugin_dirs().map(str::to_string));

        let monitor = PluginMonitor::new(
            Arc::clone(&registry),
            synchronizer,
            config.monitor.interval(),
        )
        .with_filesystem_watch(config.monitor.watch_filesystem);

        Self {
            plugins_dir,
            registry,
            monitor,
        }
    }

    /// Start monitoring the plugins directory. Restarts the monitor if it is running.
    pub fn start(&self) -> Result<()> {
        self.monitor.start()
    }

    #[allow(dead_code)] // Host API: the bundled binary runs until killed.
    pub fn stop(&self) {
        self.monitor.stop();
    }

    /// Typically `<home>/plugins`.
    #[allow(dead_code)] // Host API.
    pub fn plugins_directory(&self) -> &Path {
        &self.plugins_dir
    }

    #[allow(dead_code)] // Host API.
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn add_listener(&self, listener: Arc<dyn PluginListener>) {
        self.registry.add_listener(listener);
    }

    /// True if at least one synchronization pass completed. That does not mean
    /// any plugin was found or extracted.
    #[allow(dead_code)] // Host API.
    pub fn is_executed(&self) -> bool {
        self.registry.is_executed()
    }

    #[allow(dead_code)] // Host API.
    pub fn is_running(&self) -> bool {
        self.monitor.is_running()
    }

    /// Synchronize right away on the calling thread.
    #[allow(dead_code)] // Host API.
    pub fn run_cycle_now(&self) -> Option<CycleReport> {
        self.monitor.run_cycle()
    }
}
