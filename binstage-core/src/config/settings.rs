//! Run settings for binstage.
//!
//! Everything a run needs to know about where things live is derived from the
//! role directory handed over on the command line:
//!
//! - `<role>/defaults/main.yml`: the tool manifest
//! - `<role>/files/`: staged binaries, retained archives, the checksum cache
//! - `<role>/files/checksums.yml`: the checksum cache
//! - `<role>/files/completions_metadata.yml`: the completions manifest
//! - `<role>/files/completions/<shell>/`: harvested completion scripts

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, StageError};

// =============================================================================
// Defaults
// =============================================================================

/// Manifest key holding the tools list.
pub const DEFAULT_TOOLS_KEY: &str = "terminal_setup_tools";

/// Default timeout for completion-generating commands (60 seconds).
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

/// Subdirectory name under the OS temp folder used for downloads and scratch space.
const SCRATCH_DIR_NAME: &str = "binstage";

// =============================================================================
// Settings
// =============================================================================

/// Settings for a single run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Role directory given on the command line.
    pub role_path: PathBuf,

    /// Tool manifest (`defaults/main.yml`).
    pub defaults_file: PathBuf,

    /// Root of the staged file tree (`files/`).
    pub files_dir: PathBuf,

    /// Persisted checksum cache.
    pub checksums_file: PathBuf,

    /// Completions manifest.
    pub completions_manifest: PathBuf,

    /// Output root for completion scripts.
    pub completions_dir: PathBuf,

    /// Where downloads land before verification and extraction.
    pub scratch_dir: PathBuf,

    /// Manifest key holding the tools list. `<key>_defaults` is the fallback.
    pub tools_key: String,

    /// Kill completion commands that run longer than this.
    pub command_timeout: Duration,

    /// Optional overall timeout for each HTTP request.
    pub http_timeout: Option<Duration>,

    /// Skip the completion harvester entirely.
    pub skip_completions: bool,
}

impl Settings {
    /// Builds settings for a role directory, failing fast if it does not look
    /// like a role (no `defaults/main.yml`).
    pub fn for_role(role_path: impl Into<PathBuf>) -> Result<Self> {
        let settings = Self::with_layout(role_path.into());
        if !settings.defaults_file.is_file() {
            return Err(StageError::manifest(
                &settings.defaults_file,
                format!("not a valid role path: {}", settings.role_path.display()),
            ));
        }
        Ok(settings)
    }

    /// Builds settings without checking that the role exists.
    pub fn with_layout(role_path: PathBuf) -> Self {
        let files_dir = role_path.join("files");
        Self {
            defaults_file: role_path.join("defaults").join("main.yml"),
            checksums_file: files_dir.join("checksums.yml"),
            completions_manifest: files_dir.join("completions_metadata.yml"),
            completions_dir: files_dir.join("completions"),
            scratch_dir: std::env::temp_dir().join(SCRATCH_DIR_NAME),
            files_dir,
            role_path,
            tools_key: DEFAULT_TOOLS_KEY.to_string(),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            http_timeout: None,
            skip_completions: false,
        }
    }

    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = scratch_dir.into();
        self
    }

    pub fn with_tools_key(mut self, key: impl Into<String>) -> Self {
        self.tools_key = key.into();
        self
    }

    /// The key consulted when [`Settings::tools_key`] is missing or empty.
    pub fn fallback_tools_key(&self) -> String {
        format!("{}_defaults", self.tools_key)
    }

    /// Creates the directories a run writes into.
    pub fn ensure_dirs_exist(&self) -> Result<()> {
        for dir in [&self.files_dir, &self.scratch_dir] {
            create_dir(dir)?;
        }
        Ok(())
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|source| StageError::io(dir, source))
}
