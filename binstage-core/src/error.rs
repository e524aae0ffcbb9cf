//! Error types shared by the staging pipeline and the completion harvester.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StageError>;

/// Errors raised while staging binaries and completion scripts.
///
/// Apart from [`StageError::Manifest`] raised while loading the tool manifest,
/// every variant is scoped to a single unit of work (one tool/os/arch
/// combination or one tool/shell method) and is logged by the caller rather
/// than propagated to the top level.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Checksum mismatch for {file}: expected {expected}, got sha256:{actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("Could not find '{member}' in {}", .archive.display())]
    NotFound { member: String, archive: PathBuf },

    #[error("Failed to extract {}: {message}", .archive.display())]
    Extraction { archive: PathBuf, message: String },

    #[error("Invalid manifest {}: {message}", .path.display())]
    Manifest { path: PathBuf, message: String },

    #[error("Command `{command}` failed: {message}")]
    Subprocess { command: String, message: String },

    #[error("Invalid template '{template}': {message}")]
    Template { template: String, message: String },

    #[error("Invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("IO error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl StageError {
    pub(crate) fn fetch(url: &str, message: impl ToString) -> Self {
        Self::Fetch {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn extraction(archive: &std::path::Path, message: impl ToString) -> Self {
        Self::Extraction {
            archive: archive.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub(crate) fn manifest(path: &std::path::Path, message: impl ToString) -> Self {
        Self::Manifest {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub(crate) fn subprocess(command: &str, message: impl ToString) -> Self {
        Self::Subprocess {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn io(path: &std::path::Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Attaches a path to a bare `io::Result`.
pub(crate) trait IoContext<T> {
    fn at(self, path: &std::path::Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|source| StageError::io(path, source))
    }
}
