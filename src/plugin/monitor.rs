use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::msg::Msg;
use crate::plugin::archive;
use crate::plugin::error::{PluginError, Result};
use crate::plugin::registry::PluginRegistry;
use crate::plugin::synchronizer::{CycleReport, DirectorySynchronizer};

/// Periodically synchronizes the plugins directory on a dedicated thread.
///
/// The first cycle runs as soon as the monitor starts; later cycles run a fixed
/// delay after the previous one finished. Cycles never overlap, whether they
/// come from the timer, a filesystem wake-up or [`PluginMonitor::run_cycle`].
pub struct PluginMonitor {
    task: Arc<MonitorTask>,
    interval: Duration,
    watch_filesystem: bool,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    tx: SyncSender<Msg>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    _watcher: Option<RecommendedWatcher>,
}

struct MonitorTask {
    registry: Arc<PluginRegistry>,
    synchronizer: DirectorySynchronizer,
    cycle_lock: Mutex<()>,
}

impl PluginMonitor {
    pub fn new(
        registry: Arc<PluginRegistry>,
        synchronizer: DirectorySynchronizer,
        interval: Duration,
    ) -> Self {
        Self {
            task: Arc::new(MonitorTask {
                registry,
                synchronizer,
                cycle_lock: Mutex::new(()),
            }),
            interval,
            watch_filesystem: false,
            worker: Mutex::new(None),
        }
    }

    /// Also wake up when archives in the plugins directory change.
    pub fn with_filesystem_watch(mut self, enabled: bool) -> Self {
        self.watch_filesystem = enabled;
        self
    }

    #[allow(dead_code)] // Host API.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn plugins_dir(&self) -> &Path {
        self.task.synchronizer.plugins_dir()
    }

    /// Start periodically checking the plugins directory, replacing a running timer.
    pub fn start(&self) -> Result<()> {
        self.stop();

        let (tx, rx) = mpsc::sync_channel(1);
        let stop = Arc::new(AtomicBool::new(false));

        let task = Arc::clone(&self.task);
        let interval = self.interval;
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("plugin-monitor".to_string())
            .spawn(move || run_worker(&task, &rx, interval, &stop_flag))
            .map_err(PluginError::Spawn)?;

        let watcher = if self.watch_filesystem {
            watch_plugins_dir(self.plugins_dir().to_path_buf(), tx.clone())
        } else {
            None
        };

        let raced = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Worker {
                tx,
                stop,
                handle,
                _watcher: watcher,
            });
        if let Some(raced) = raced {
            raced.shutdown();
        }

        tracing::info!(
            "plugin monitor started: checking {} every {}s",
            self.plugins_dir().display(),
            self.interval.as_secs_f32()
        );
        Ok(())
    }

    /// Stop the timer and wait for a running cycle to finish.
    pub fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(worker) = worker {
            worker.shutdown();
            tracing::info!("plugin monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Ask the worker for an early cycle. Requests made while one is already
    /// pending collapse into it; returns false in that case or when stopped.
    #[cfg(test)]
    pub fn trigger(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|worker| worker.tx.try_send(Msg::Wake).is_ok())
    }

    /// Run one cycle on the calling thread, waiting for any cycle in progress.
    pub fn run_cycle(&self) -> Option<CycleReport> {
        self.task.run()
    }
}

impl Drop for PluginMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Worker {
    fn shutdown(self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.tx.try_send(Msg::Stop);
        drop(self._watcher);
        drop(self.tx);

        // A listener stopping the monitor from inside a cycle must not join itself.
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            tracing::warn!("plugin monitor thread panicked");
        }
    }
}

impl MonitorTask {
    fn run(&self) -> Option<CycleReport> {
        let _guard = self.cycle_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.synchronizer.synchronize(&self.registry)
        }));

        match outcome {
            Ok(Ok(report)) => {
                log_report(&report);
                Some(report)
            }
            Ok(Err(err)) => {
                tracing::error!("unable to process plugins: {err}");
                None
            }
            Err(payload) => {
                tracing::error!(
                    "an unexpected panic occurred while monitoring plugins: {}",
                    panic_message(payload.as_ref())
                );
                None
            }
        }
    }
}

fn run_worker(task: &MonitorTask, rx: &Receiver<Msg>, interval: Duration, stop: &AtomicBool) {
    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }

        task.run();

        match rx.recv_timeout(interval) {
            Ok(Msg::Wake) | Err(RecvTimeoutError::Timeout) => {}
            Ok(Msg::Stop) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn watch_plugins_dir(dir: PathBuf, tx: SyncSender<Msg>) -> Option<RecommendedWatcher> {
    let mut watcher: RecommendedWatcher =
        match notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) && event.paths.iter().any(|path| is_archive(path));

                if relevant {
                    // Full channel means a wake-up is already pending.
                    let _ = tx.try_send(Msg::Wake);
                }
            }
            Err(err) => {
                tracing::warn!("plugin watcher error: {err}");
            }
        }) {
            Ok(w) => w,
            Err(err) => {
                tracing::warn!("failed to initialize plugin watcher: {err}");
                return None;
            }
        };

    if let Err(err) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
        tracing::warn!("failed to watch plugins directory {}: {err}", dir.display());
        return None;
    }

    Some(watcher)
}

fn is_archive(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(archive::canonical_name)
        .is_some()
}

fn log_report(report: &CycleReport) {
    let changed = report.extracted.len() + report.retired.len() + report.unloaded.len();
    if changed > 0 || !report.failed.is_empty() {
        tracing::info!(
            "plugins monitored: {} extracted, {} removed, {} unloaded, {} failed, {} not plugins",
            report.extracted.len(),
            report.retired.len(),
            report.unloaded.len(),
            report.failed.len(),
            report.skipped.len()
        );
    } else {
        tracing::debug!("plugins monitored: no changes");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
