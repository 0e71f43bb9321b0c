use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, PluginError>;

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugins directory does not exist (or is no directory): {}", .0.display())]
    DirectoryUnavailable(PathBuf),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {source}", .path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("extraction target already exists: {}", .0.display())]
    TargetExists(PathBuf),

    #[error("invalid plugin descriptor {}: {reason}", .path.display())]
    Descriptor { path: PathBuf, reason: String },

    #[error("failed to spawn plugin monitor: {0}")]
    Spawn(#[source] std::io::Error),
}

impl PluginError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn zip(path: impl AsRef<Path>, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Attach the offending path to an I/O result.
pub trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|err| PluginError::io(path, err))
    }
}
