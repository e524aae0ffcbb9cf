//! Binary provisioning pipeline.
//!
//! For every binary tool and every declared (os, arch) combination:
//! resolve URLs, obtain the expected digest (cache first), download and
//! verify, extract the executable to its staged path, and keep the archive
//! next to it for completion harvesting.
//!
//! A combination whose staged binary already exists is skipped without any
//! network access. Failures are logged per combination and never abort the
//! run.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::checksum::ChecksumResolver;
use super::context::RunContext;
use super::downloader::{ContentFetcher, Transport};
use super::extractor::ArchiveExtractor;
use super::manifest::ToolManifest;
use super::paths;
use super::types::{ArchiveFormat, BinaryDescriptor, ToolSpec};
use crate::config::Settings;
use crate::error::{IoContext, Result};

/// What happened to one (tool, os, arch) combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    AlreadyStaged,
    Staged,
    /// No digest could be determined; nothing was downloaded for staging.
    Abandoned,
}

/// Tally of a provisioning run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionSummary {
    pub staged: usize,
    pub already_staged: usize,
    pub abandoned: usize,
    pub failed: usize,
}

impl ProvisionSummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::AlreadyStaged => self.already_staged += 1,
            Outcome::Staged => self.staged += 1,
            Outcome::Abandoned => self.abandoned += 1,
        }
    }
}

/// Stages binaries declared in a tool manifest.
#[derive(Debug)]
pub struct ToolProvisioner {
    fetcher: ContentFetcher,
    extractor: ArchiveExtractor,
    files_dir: PathBuf,
}

impl ToolProvisioner {
    /// Downloads land in `<scratch>/downloads`, extraction happens under `<scratch>`.
    pub fn new(settings: &Settings, transport: Arc<dyn Transport>) -> Self {
        Self {
            fetcher: ContentFetcher::new(transport, settings.scratch_dir.join("downloads")),
            extractor: ArchiveExtractor::new(&settings.scratch_dir),
            files_dir: settings.files_dir.clone(),
        }
    }

    pub fn fetcher(&self) -> &ContentFetcher {
        &self.fetcher
    }

    /// Provisions every binary tool in `manifest`, in manifest order.
    pub async fn run(&self, manifest: &ToolManifest, ctx: &mut RunContext) -> ProvisionSummary {
        let mut summary = ProvisionSummary::default();

        for tool in manifest.tools.iter().filter(|t| t.is_binary_install()) {
            info!("Processing tool: {} v{}", tool.name, tool.version);

            if tool.binaries.is_empty() {
                warn!("Tool '{}' is a binary install but declares no binaries", tool.name);
                continue;
            }

            for (os, arch, descriptor) in tool.variants() {
                match self.provision(tool, os, arch, descriptor, ctx).await {
                    Ok(outcome) => summary.record(outcome),
                    Err(e) => {
                        error!("Failed to provision {} for {}/{}: {}", tool.name, os, arch, e);
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(
            "Provisioning done: {} staged, {} already present, {} abandoned, {} failed",
            summary.staged, summary.already_staged, summary.abandoned, summary.failed
        );
        summary
    }

    async fn provision(
        &self,
        tool: &ToolSpec,
        os: &str,
        arch: &str,
        descriptor: &BinaryDescriptor,
        ctx: &mut RunContext,
    ) -> Result<Outcome> {
        let dest = paths::staged_binary_path(&self.files_dir, tool, os, arch);
        if dest.exists() {
            debug!("{} already staged at {}", tool.name, dest.display());
            return Ok(Outcome::AlreadyStaged);
        }

        let binary = descriptor.resolve(tool, os, arch)?;
        let key = tool.cache_key(os, arch);

        let digest = match ctx.cache().get(&key).cloned() {
            Some(digest) => {
                debug!("Using cached checksum for {}", key);
                digest
            }
            None => match ChecksumResolver::new(&self.fetcher).resolve(tool, &binary).await {
                Some(resolved) => {
                    info!("Checksum for {} from {}: {}", key, resolved.source, resolved.digest);
                    if ctx.cache_mut().insert(key.clone(), resolved.digest.clone()) {
                        ctx.mark_changed();
                    }
                    resolved.digest
                }
                None => {
                    warn!("Could not determine a checksum for {}, skipping", key);
                    return Ok(Outcome::Abandoned);
                }
            },
        };

        let download = self
            .fetcher
            .download(&binary.url, &binary.archive_filename, Some(&digest))
            .await?;

        if let Err(e) = self
            .extractor
            .extract(&download, &binary.executable_in_archive, &dest)
        {
            remove_quietly(&download);
            return Err(e);
        }

        let version_dir = paths::staged_version_dir(&self.files_dir, tool, os, arch);
        if ArchiveFormat::from_name(&binary.archive_filename).is_archive() {
            let retained = version_dir.join(&binary.archive_filename);
            if let Err(e) = move_file(&download, &retained) {
                warn!("Failed to keep archive at {}: {}", retained.display(), e);
                remove_quietly(&download);
            }
        } else {
            remove_quietly(&download);
        }

        ctx.mark_changed();
        info!("Staged {} at {}", tool.name, dest.display());
        Ok(Outcome::Staged)
    }
}

/// Renames `from` to `to`, copying when they sit on different filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).at(to)?;
    fs::remove_file(from).at(from)?;
    Ok(())
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        debug!("Could not remove {}: {}", path.display(), e);
    }
}
