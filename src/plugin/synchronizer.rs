use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::plugin::archive::{self, ArchiveState, PluginArchive};
use crate::plugin::cleanup::{DirectoryRemover, FsRemover, RetryPolicy};
use crate::plugin::descriptor::{DESCRIPTOR_FILE, PluginDescriptor};
use crate::plugin::error::{IoContext, PluginError, Result};
use crate::plugin::extractor::{ArchiveExtractor, ExtractOutcome, STAGING_SUFFIX};
use crate::plugin::load_order::{self, LoadOrder};
use crate::plugin::registry::PluginRegistry;

/// What one synchronization pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub extracted: Vec<String>,
    /// Stale directories deleted before the first load.
    pub retired: Vec<String>,
    /// Stale plugins handed to the unload hook.
    pub unloaded: Vec<String>,
    /// Archives without a descriptor.
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    /// Exploded plugin directories present after the pass.
    pub exploded: Vec<String>,
    pub load_order: LoadOrder,
    /// Validated extra plugin directories, for the host.
    pub extra_plugin_dirs: BTreeSet<PathBuf>,
}

/// Keeps exploded plugin directories in step with their archives.
pub struct DirectorySynchronizer {
    plugins_dir: PathBuf,
    extractor: ArchiveExtractor,
    remover: Box<dyn DirectoryRemover>,
    retry: RetryPolicy,
    extra_plugin_dirs: Option<String>,
}

impl DirectorySynchronizer {
    pub fn new(plugins_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            extractor: ArchiveExtractor,
            remover: Box::new(FsRemover),
            retry: RetryPolicy::default(),
            extra_plugin_dirs: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[cfg(test)]
    pub fn with_remover(mut self, remover: Box<dyn DirectoryRemover>) -> Self {
        self.remover = remover;
        self
    }

    /// Comma-separated list, re-validated on every pass.
    pub fn with_extra_plugin_dirs(mut self, raw: Option<String>) -> Self {
        self.extra_plugin_dirs = raw;
        self
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// Run one classify-and-act pass over the plugins directory.
    ///
    /// Per-archive failures are logged and recorded in the report; only an
    /// unusable plugins directory aborts the pass. On success the registry is
    /// told the pass completed.
    pub fn synchronize(&self, registry: &PluginRegistry) -> Result<CycleReport> {
        let dir = &self.plugins_dir;
        if !dir.is_dir() {
            return Err(PluginError::DirectoryUnavailable(dir.clone()));
        }
        let archives = archive::list_archives(dir).map_err(|err| {
            tracing::debug!("cannot list {}: {err}", dir.display());
            PluginError::DirectoryUnavailable(dir.clone())
        })?;

        let mut report = CycleReport::default();

        for plugin in archives {
            if let Err(err) = self.sync_archive(&plugin, registry, &mut report) {
                tracing::error!("failed to synchronize plugin '{}': {err}", plugin.canonical_name);
                report.failed.push(plugin.canonical_name);
            }
        }

        let exploded = self.exploded_plugins()?;
        report.exploded = exploded.keys().cloned().collect();
        report.load_order = load_order::resolve(&exploded);
        for (plugin, missing) in &report.load_order.unresolved {
            tracing::warn!("plugin '{plugin}' requires missing plugin '{missing}'");
        }
        if !report.load_order.cyclic.is_empty() {
            tracing::warn!(
                "plugins with circular requirements: {}",
                report.load_order.cyclic.join(", ")
            );
        }

        if let Some(raw) = self.extra_plugin_dirs.as_deref() {
            report.extra_plugin_dirs = parse_extra_plugin_dirs(raw);
        }

        registry.fire_plugins_monitored(&report);
        Ok(report)
    }

    fn sync_archive(
        &self,
        plugin: &PluginArchive,
        registry: &PluginRegistry,
        report: &mut CycleReport,
    ) -> Result<()> {
        let name = &plugin.canonical_name;
        let dir = plugin.exploded_dir();

        if plugin.state()? == ArchiveState::Stale {
            if registry.is_executed() {
                registry.unload_plugin(name);
                report.unloaded.push(name.clone());
            } else if self.retry.remove(self.remover.as_ref(), &dir) {
                tracing::debug!("removed stale plugin directory {}", dir.display());
                report.retired.push(name.clone());
            }
        }

        if !dir.exists() {
            match self.extractor.extract(name, &plugin.path, &dir) {
                ExtractOutcome::Extracted => report.extracted.push(name.clone()),
                ExtractOutcome::NotAPlugin => report.skipped.push(name.clone()),
                ExtractOutcome::Failed => report.failed.push(name.clone()),
            }
        }

        Ok(())
    }

    /// Exploded plugins and what each requires. Staging directories and
    /// directories without a descriptor are not plugins.
    fn exploded_plugins(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let dir = &self.plugins_dir;
        let mut plugins = BTreeMap::new();

        for entry in fs::read_dir(dir).at(dir)?.flatten() {
            let path = entry.path();
            if !path.is_dir() || !path.join(DESCRIPTOR_FILE).is_file() {
                continue;
            }

            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(STAGING_SUFFIX) {
                continue;
            }

            let requirements = match PluginDescriptor::read(&path) {
                Ok(descriptor) => {
                    tracing::debug!(
                        "found plugin '{name}': {} {}",
                        descriptor.name.as_deref().unwrap_or(name),
                        descriptor.version.as_deref().unwrap_or("(unversioned)")
                    );
                    descriptor.requirements().map(str::to_string).collect()
                }
                Err(err) => {
                    tracing::warn!("ignoring requirements of '{name}': {err}");
                    Vec::new()
                }
            };
            plugins.insert(name.to_lowercase(), requirements);
        }

        Ok(plugins)
    }
}

/// Keep the entries of a comma-separated list that exist and are directories.
pub fn parse_extra_plugin_dirs(raw: &str) -> BTreeSet<PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let path = PathBuf::from(entry);
            if path.is_dir() {
                Some(path)
            } else {
                tracing::error!(
                    "unable to use extra plugin directory [{}] (parsed from raw value [{raw}]): \
                     path does not exist, or is not a directory",
                    path.display()
                );
                None
            }
        })
        .collect()
}
