use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use zip::ZipArchive;

use crate::plugin::archive;
use crate::plugin::descriptor::{DESCRIPTOR_FILE, MANIFEST_SUFFIX};
use crate::plugin::error::{IoContext, PluginError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    Extracted,
    /// The archive has no descriptor; left alone.
    NotAPlugin,
    /// Logged; nothing was left at the target.
    Failed,
}

/// Unpacks plugin archives into their exploded directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveExtractor;

impl ArchiveExtractor {
    /// Extract `archive` into `target`, which must not exist yet. Never returns an error:
    /// failures are logged with the plugin name and reported as [`ExtractOutcome::Failed`].
    pub fn extract(&self, plugin_name: &str, archive: &Path, target: &Path) -> ExtractOutcome {
        match self.try_extract(plugin_name, archive, target) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!("failed to extract plugin '{plugin_name}': {err}");
                ExtractOutcome::Failed
            }
        }
    }

    fn try_extract(&self, plugin_name: &str, archive: &Path, target: &Path) -> Result<ExtractOutcome> {
        let file = File::open(archive).at(archive)?;
        let mut zip = ZipArchive::new(file).map_err(|err| PluginError::zip(archive, err))?;

        if zip.index_for_name(DESCRIPTOR_FILE).is_none() {
            tracing::debug!("{} is not a plugin, ignoring", archive.display());
            return Ok(ExtractOutcome::NotAPlugin);
        }

        if target.exists() {
            return Err(PluginError::TargetExists(target.to_path_buf()));
        }

        let modified = archive::modified(archive)?;
        let staging = staging_dir(target);
        if staging.exists() {
            fs::remove_dir_all(&staging).at(&staging)?;
        }
        fs::create_dir(&staging).at(&staging)?;

        tracing::debug!("extracting plugin '{plugin_name}'...");
        let staged = unpack(&mut zip, archive, &staging)
            .and_then(|()| publish(&staging, target, modified));
        if let Err(err) = staged {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                tracing::warn!("could not remove {}: {cleanup}", staging.display());
            }
            return Err(err);
        }

        tracing::debug!("successfully extracted plugin '{plugin_name}'");

        Ok(ExtractOutcome::Extracted)
    }
}

/// Ends the name of a directory that is still being unpacked.
pub const STAGING_SUFFIX: &str = ".extracting";

/// Hidden sibling used while an archive is being unpacked.
pub fn staging_dir(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}{STAGING_SUFFIX}"))
}

fn unpack(zip: &mut ZipArchive<File>, archive: &Path, dest: &Path) -> Result<()> {
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|err| PluginError::zip(archive, err))?;

        if entry.name().to_lowercase().ends_with(MANIFEST_SUFFIX) {
            continue;
        }

        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!(
                "skipping entry '{}' in {}: path escapes the plugin directory",
                entry.name(),
                archive.display()
            );
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).at(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        let mut out = File::create(&out_path).at(&out_path)?;
        io::copy(&mut entry, &mut out).at(&out_path)?;
    }

    Ok(())
}

/// Stamp the staged directory, then move it into place. The rename keeps the
/// timestamp, so `target` never exists without the archive's modification time.
fn publish(staging: &Path, target: &Path, modified: SystemTime) -> Result<()> {
    set_modified(staging, modified)?;
    fs::rename(staging, target).at(target)
}

fn set_modified(dir: &Path, time: SystemTime) -> Result<()> {
    File::open(dir).and_then(|f| f.set_modified(time)).at(dir)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    pub(crate) fn write_archive(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        for (name, content) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(*name, SimpleFileOptions::default())
                    .unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    pub(crate) fn touch(path: &Path, time: SystemTime) {
        let file = if path.is_dir() {
            File::open(path).unwrap()
        } else {
            File::options().write(true).open(path).unwrap()
        };
        file.set_modified(time).unwrap();
    }

    fn plugin_time() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_600_000_000)
    }

    #[test]
    fn extracts_entries_and_stamps_directory() {
        let temp = TempDir::new().unwrap();
        let jar = temp.path().join("search.jar");
        write_archive(
            &jar,
            &[
                ("plugin.xml", "<plugin/>"),
                ("a/", ""),
                ("a/b.txt", "hello"),
                ("META-INF/MANIFEST.MF", "Manifest-Version: 1.0"),
            ],
        );
        touch(&jar, plugin_time());
        let target = temp.path().join("search");

        let outcome = ArchiveExtractor.extract("search", &jar, &target);

        assert_eq!(outcome, ExtractOutcome::Extracted);
        assert_eq!(fs::read_to_string(target.join("a/b.txt")).unwrap(), "hello");
        assert!(target.join("plugin.xml").is_file());
        assert!(!target.join("META-INF/MANIFEST.MF").exists());
        assert_eq!(
            archive::millis(archive::modified(&target).unwrap()),
            archive::millis(plugin_time())
        );
        assert!(!staging_dir(&target).exists());
    }

    #[test]
    fn archive_without_descriptor_is_ignored() {
        let temp = TempDir::new().unwrap();
        let jar = temp.path().join("library.jar");
        write_archive(&jar, &[("com/example/Lib.class", "cafebabe")]);
        let target = temp.path().join("library");

        assert_eq!(
            ArchiveExtractor.extract("library", &jar, &target),
            ExtractOutcome::NotAPlugin
        );
        assert!(!target.exists());
    }

    #[test]
    fn corrupt_archive_fails_without_leftovers() {
        let temp = TempDir::new().unwrap();
        let jar = temp.path().join("broken.jar");
        fs::write(&jar, b"definitely not a zip").unwrap();
        let target = temp.path().join("broken");

        assert_eq!(
            ArchiveExtractor.extract("broken", &jar, &target),
            ExtractOutcome::Failed
        );
        assert!(!target.exists());
        assert!(!staging_dir(&target).exists());
    }

    #[test]
    fn existing_target_is_not_overwritten() {
        let temp = TempDir::new().unwrap();
        let jar = temp.path().join("search.jar");
        write_archive(&jar, &[("plugin.xml", "<plugin/>"), ("new.txt", "new")]);
        let target = temp.path().join("search");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("old.txt"), "old").unwrap();

        assert_eq!(
            ArchiveExtractor.extract("search", &jar, &target),
            ExtractOutcome::Failed
        );
        assert!(target.join("old.txt").exists());
        assert!(!target.join("new.txt").exists());
    }

    #[test]
    fn leftover_staging_directory_is_replaced() {
        let temp = TempDir::new().unwrap();
        let jar = temp.path().join("search.jar");
        write_archive(&jar, &[("plugin.xml", "<plugin/>")]);
        let target = temp.path().join("search");
        let staging = staging_dir(&target);
        fs::create_dir(&staging).unwrap();
        fs::write(staging.join("stale.txt"), "half written").unwrap();

        assert_eq!(
            ArchiveExtractor.extract("search", &jar, &target),
            ExtractOutcome::Extracted
        );
        assert!(!target.join("stale.txt").exists());
        assert!(!staging.exists());
    }

    #[test]
    fn published_directory_keeps_the_staged_timestamp() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("search");
        let staging = staging_dir(&target);
        fs::create_dir(&staging).unwrap();
        fs::write(staging.join("plugin.xml"), "<plugin/>").unwrap();

        publish(&staging, &target, plugin_time()).unwrap();

        assert!(!staging.exists());
        assert!(target.join("plugin.xml").is_file());
        assert_eq!(
            archive::millis(archive::modified(&target).unwrap()),
            archive::millis(plugin_time())
        );
    }

    #[test]
    fn failed_stamp_never_publishes_the_target() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("search");

        // Nothing staged: stamping fails before anything is renamed.
        assert!(publish(&staging_dir(&target), &target, plugin_time()).is_err());
        assert!(!target.exists());
    }

    #[test]
    fn staging_dir_is_hidden_sibling() {
        assert_eq!(
            staging_dir(Path::new("/plugins/search")),
            PathBuf::from("/plugins/.search.extracting")
        );
    }
}
