mod model;
mod msg;
mod plugin;

use std::sync::Arc;
use std::thread;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use model::config::AppConfig;
use plugin::synchronizer::CycleReport;
use plugin::{PluginListener, PluginManager};

/// Reports the load order the host should follow after every pass.
struct LoadOrderLog;

impl PluginListener for LoadOrderLog {
    fn on_plugin_stale(&self, canonical_name: &str) {
        tracing::info!("plugin '{canonical_name}' changed on disk and must be reloaded");
    }

    fn on_cycle_complete(&self, report: &CycleReport) {
        if !report.extracted.is_empty() {
            tracing::info!("load order: {}", report.load_order.ordered.join(", "));
        }
        for dir in &report.extra_plugin_dirs {
            tracing::debug!("extra plugin directory: {}", dir.display());
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging to file
    let log_dir = directories::ProjectDirs::from("", "", "charlotte")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from("/tmp"));
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "charlotte.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("charlotte=info")),
        )
        .init();

    tracing::info!("charlotte starting");

    let config = AppConfig::load()?;
    tracing::info!("home: {}", config.home_path().display());

    // Created before starting so listeners see the very first pass.
    let manager = PluginManager::new(&config);
    manager.add_listener(Arc::new(LoadOrderLog));
    manager.start()?;

    // The monitor thread does the work from here on.
    loop {
        thread::park();
    }
}
