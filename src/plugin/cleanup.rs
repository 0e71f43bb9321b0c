use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use walkdir::WalkDir;

/// Removes exploded plugin directories. Swappable so lock contention can be simulated.
pub trait DirectoryRemover: Send + Sync {
    /// Returns true once `dir` no longer exists.
    fn remove(&self, dir: &Path) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsRemover;

impl DirectoryRemover for FsRemover {
    fn remove(&self, dir: &Path) -> bool {
        delete_dir(dir)
    }
}

/// Bounded retry for deleting a stale directory before the first load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Try `remover` until it succeeds or the retries run out, sleeping between attempts.
    /// Blocks the calling thread for at most `retries * interval`.
    pub fn remove(&self, remover: &dyn DirectoryRemover, dir: &Path) -> bool {
        let mut retries = 0;
        loop {
            if remover.remove(dir) {
                return true;
            }

            if retries >= self.retries {
                tracing::warn!(
                    "giving up deleting {} after {} attempts",
                    dir.display(),
                    retries + 1
                );
                return false;
            }

            retries += 1;
            thread::sleep(self.interval);
        }
    }
}

/// Delete a directory tree, children first. Returns true if `dir` is gone afterwards.
pub fn delete_dir(dir: &Path) -> bool {
    if dir.is_dir() {
        for entry in WalkDir::new(dir).contents_first(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!("plugin removal: could not walk {}: {err}", dir.display());
                    return !dir.exists();
                }
            };

            let path = entry.path();
            let removed = if entry.file_type().is_dir() {
                fs::remove_dir(path)
            } else {
                fs::remove_file(path)
            };

            if let Err(err) = ignore_missing(removed) {
                tracing::debug!("plugin removal: could not delete {}: {err}", path.display());
                return !dir.exists();
            }
        }
    } else if dir.exists() {
        if let Err(err) = ignore_missing(fs::remove_file(dir)) {
            tracing::debug!("plugin removal: could not delete {}: {err}", dir.display());
        }
    }

    !dir.exists()
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
