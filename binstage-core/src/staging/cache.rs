//! Persistent checksum cache.
//!
//! Maps `name-version-os-arch` to `sha256:<hex>`. The file is read once at the
//! start of a run and rewritten wholesale (sorted, atomically) only when a
//! digest was added or changed. Entries are never removed automatically.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::types::Sha256Digest;
use crate::error::{IoContext, Result, StageError};

#[derive(Debug, Clone)]
pub struct ChecksumCache {
    path: PathBuf,
    entries: BTreeMap<String, Sha256Digest>,
    dirty: bool,
}

impl ChecksumCache {
    /// An empty cache that will be saved to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Loads the cache from disk.
    ///
    /// A missing file yields an empty cache. A corrupted file is logged and
    /// treated as empty; it is only overwritten if the run adds entries.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            debug!("Checksum cache not found at {}, starting empty", path.display());
            return Ok(Self::empty(path));
        }

        let content = fs::read_to_string(&path).at(&path)?;
        if content.trim().is_empty() {
            return Ok(Self::empty(path));
        }
        let entries = match serde_yaml::from_str::<Option<BTreeMap<String, Sha256Digest>>>(&content) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                warn!(
                    "Failed to parse checksum cache at {}: {}. Starting fresh.",
                    path.display(),
                    e
                );
                BTreeMap::new()
            }
        };

        debug!("Loaded {} cached checksums", entries.len());
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&Sha256Digest> {
        self.entries.get(key)
    }

    /// Records a digest. Returns true if the cache changed.
    pub fn insert(&mut self, key: impl Into<String>, digest: Sha256Digest) -> bool {
        let key = key.into();
        if self.entries.get(&key) == Some(&digest) {
            return false;
        }
        self.entries.insert(key, digest);
        self.dirty = true;
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the cache if anything was added. Returns true if the file was written.
    pub fn save_if_dirty(&mut self) -> Result<bool> {
        if !self.dirty {
            debug!("Checksum cache unchanged, not rewriting {}", self.path.display());
            return Ok(false);
        }
        self.save()?;
        self.dirty = false;
        Ok(true)
    }

    fn save(&self) -> Result<()> {
        info!("Updating checksums cache file: {}", self.path.display());

        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).at(parent)?;

        let content = serde_yaml::to_string(&self.entries)
            .map_err(|e| StageError::manifest(&self.path, format!("failed to serialize: {}", e)))?;

        // Write next to the target, then rename over it.
        let mut tmp = tempfile::NamedTempFile::new_in(parent).at(parent)?;
        tmp.write_all(content.as_bytes()).at(tmp.path())?;
        tmp.as_file().sync_all().at(&self.path)?;
        tmp.persist(&self.path)
            .map_err(|e| StageError::io(&self.path, e.error))?;

        Ok(())
    }
}
