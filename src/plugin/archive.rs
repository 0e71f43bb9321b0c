use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::plugin::error::{IoContext, Result};

/// Archive suffixes recognized as plugin packages, compared case-insensitively.
pub const ARCHIVE_EXTENSIONS: [&str; 2] = [".jar", ".war"];

/// A packaged plugin sitting in the plugins directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginArchive {
    pub canonical_name: String,
    pub path: PathBuf,
}

/// How an archive relates to its exploded directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    /// No exploded directory yet.
    New,
    /// The archive is newer than its exploded directory.
    Stale,
    Current,
}

impl PluginArchive {
    /// Build an archive from a file name, `None` if it is not a plugin archive name.
    pub fn from_path(path: PathBuf) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        let canonical_name = canonical_name(file_name)?;
        Some(Self {
            canonical_name,
            path,
        })
    }

    /// Where this archive explodes to: a sibling directory named after the plugin.
    pub fn exploded_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map_or_else(|| PathBuf::from(&self.canonical_name), |parent| {
                parent.join(&self.canonical_name)
            })
    }

    pub fn modified(&self) -> Result<SystemTime> {
        modified(&self.path)
    }

    pub fn state(&self) -> Result<ArchiveState> {
        let dir = self.exploded_dir();
        if !dir.exists() {
            return Ok(ArchiveState::New);
        }
        Ok(classify(self.modified()?, modified(&dir)?))
    }
}

/// Strip the four-character extension and lowercase what remains.
pub fn canonical_name(file_name: &str) -> Option<String> {
    let split = file_name.len().checked_sub(4)?;
    if split == 0 || !file_name.is_char_boundary(split) {
        return None;
    }

    let (stem, extension) = file_name.split_at(split);
    ARCHIVE_EXTENSIONS
        .iter()
        .any(|ext| extension.eq_ignore_ascii_case(ext))
        .then(|| stem.to_lowercase())
}

/// Compare at millisecond resolution; only a strictly newer archive is stale.
pub fn classify(archive_modified: SystemTime, dir_modified: SystemTime) -> ArchiveState {
    if millis(archive_modified) > millis(dir_modified) {
        ArchiveState::Stale
    } else {
        ArchiveState::Current
    }
}

/// Plugin archives directly under `dir`, in listing order.
pub fn list_archives(dir: &Path) -> Result<Vec<PluginArchive>> {
    let mut archives = Vec::new();

    for entry in fs::read_dir(dir).at(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("skipping unreadable entry in {}: {err}", dir.display());
                continue;
            }
        };

        let path = entry.path();
        if path.is_dir() {
            continue;
        }

        if let Some(archive) = PluginArchive::from_path(path) {
            archives.push(archive);
        }
    }

    Ok(archives)
}

pub fn modified(path: &Path) -> Result<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).at(path)
}

pub fn millis(time: SystemTime) -> i128 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as i128,
        Err(before) => -(before.duration().as_millis() as i128),
    }
}
