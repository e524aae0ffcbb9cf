//! Expected-digest resolution.
//!
//! Strategies, first success wins:
//!
//! 1. the descriptor's `checksum_url`: first whitespace-delimited token of its body
//! 2. the tool's release-wide checksum file: first token of the first line
//!    mentioning the artifact's file name
//! 3. download the artifact and hash it
//!
//! Remote sources are trusted to put the hex digest first; the token is only
//! checked for shape, and a malformed one is logged but still used.

use std::fmt;
use tracing::{debug, info, warn};

use super::downloader::{sha256_file, ContentFetcher};
use super::types::{ResolvedBinary, Sha256Digest, ToolSpec};

/// Where a resolved digest came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumSource {
    ChecksumUrl,
    ReleaseFile,
    Computed,
}

impl fmt::Display for ChecksumSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ChecksumUrl => "checksum URL",
            Self::ReleaseFile => "release checksum file",
            Self::Computed => "computed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChecksum {
    pub digest: Sha256Digest,
    pub source: ChecksumSource,
}

/// Determines the expected digest of a binary artifact.
#[derive(Debug, Clone, Copy)]
pub struct ChecksumResolver<'a> {
    fetcher: &'a ContentFetcher,
}

impl<'a> ChecksumResolver<'a> {
    pub fn new(fetcher: &'a ContentFetcher) -> Self {
        Self { fetcher }
    }

    /// Runs the strategies in order. Returns `None` only when every strategy failed.
    pub async fn resolve(&self, tool: &ToolSpec, binary: &ResolvedBinary) -> Option<ResolvedChecksum> {
        let resolved = match self.from_checksum_url(binary).await {
            Some(digest) => Some((digest, ChecksumSource::ChecksumUrl)),
            None => match self.from_release_file(binary).await {
                Some(digest) => Some((digest, ChecksumSource::ReleaseFile)),
                None => self
                    .compute(tool, binary)
                    .await
                    .map(|digest| (digest, ChecksumSource::Computed)),
            },
        };

        resolved.map(|(digest, source)| {
            if !digest.is_well_formed() {
                warn!(
                    "Checksum {} for {} from {} is not a 64-character hex digest",
                    digest, binary.archive_filename, source
                );
            }
            ResolvedChecksum { digest, source }
        })
    }

    async fn from_checksum_url(&self, binary: &ResolvedBinary) -> Option<Sha256Digest> {
        let url = binary.checksum_url.as_deref()?;
        info!("Fetching checksum from {}", url);

        match self.fetcher.fetch_text(url).await {
            Ok(content) => first_token(&content).map(Sha256Digest::from_hex),
            Err(e) => {
                warn!("Could not fetch {}: {}", url, e);
                None
            }
        }
    }

    async fn from_release_file(&self, binary: &ResolvedBinary) -> Option<Sha256Digest> {
        let url = binary.release_checksums_url.as_deref()?;
        info!("Fetching and parsing release checksum file: {}", url);

        match self.fetcher.fetch_text(url).await {
            Ok(content) => {
                let found = find_in_release_file(&content, &binary.archive_filename);
                if found.is_none() {
                    debug!("{} not listed in {}", binary.archive_filename, url);
                }
                found.map(Sha256Digest::from_hex)
            }
            Err(e) => {
                warn!("Could not fetch {}: {}", url, e);
                None
            }
        }
    }

    async fn compute(&self, tool: &ToolSpec, binary: &ResolvedBinary) -> Option<Sha256Digest> {
        info!(
            "No remote checksum found for {}. Calculating for {}.",
            tool.name, binary.archive_filename
        );

        let path = match self
            .fetcher
            .download(&binary.url, &binary.archive_filename, None)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                warn!("Failed to download {} for hashing: {}", binary.url, e);
                return None;
            }
        };

        let hashed = sha256_file(&path);
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("Failed to remove {}: {}", path.display(), e);
        }

        match hashed {
            Ok(hex) => Some(Sha256Digest::from_hex(&hex)),
            Err(e) => {
                warn!("Failed to hash {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// First whitespace-delimited token, if any.
fn first_token(content: &str) -> Option<&str> {
    content.split_whitespace().next()
}

/// First token of the first line that mentions `file_name`.
fn find_in_release_file<'c>(content: &'c str, file_name: &str) -> Option<&'c str> {
    content
        .lines()
        .find(|line| line.contains(file_name))
        .and_then(first_token)
}
