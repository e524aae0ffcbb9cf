//! Core types for tool staging.
//!
//! This module defines the typed view of the tool manifest (tools, their
//! per-platform binary descriptors, checksum hints) along with digests and
//! archive formats.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

use super::template;
use crate::error::{Result, StageError};

// ============================================================================
// Tool Manifest Entries
// ============================================================================

/// How a tool is installed on the managed host.
///
/// Only [`InstallType::Binary`] tools are staged; other kinds are handled by
/// the role itself (package managers, plugins, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallType {
    /// Prebuilt binary downloaded from a release URL.
    Binary,
    /// Anything else.
    #[default]
    #[serde(other)]
    Other,
}

/// A single tool declared in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub version: String,
    #[serde(default)]
    pub install_type: InstallType,
    /// Name of the executable when it differs from the tool name.
    #[serde(default)]
    pub executable_name: Option<String>,
    /// OS -> architecture -> descriptor.
    #[serde(default)]
    pub binaries: BTreeMap<String, BTreeMap<String, BinaryDescriptor>>,
    #[serde(default)]
    pub checksum_info: Option<ChecksumInfo>,
}

impl ToolSpec {
    pub fn is_binary_install(&self) -> bool {
        self.install_type == InstallType::Binary
    }

    /// The executable name, defaulting to the tool name.
    pub fn executable_name(&self) -> &str {
        self.executable_name.as_deref().unwrap_or(&self.name)
    }

    /// Every declared (os, arch, descriptor) combination.
    pub fn variants(&self) -> impl Iterator<Item = (&str, &str, &BinaryDescriptor)> {
        self.binaries.iter().flat_map(|(os, arches)| {
            arches
                .iter()
                .map(move |(arch, descriptor)| (os.as_str(), arch.as_str(), descriptor))
        })
    }

    /// Composite key used by the checksum cache.
    pub fn cache_key(&self, os: &str, arch: &str) -> String {
        format!("{}-{}-{}-{}", self.name, self.version, os, arch)
    }
}

/// Download information for one (tool, os, arch) triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryDescriptor {
    /// Download URL template.
    pub url: String,
    /// URL of a file whose first token is the artifact's SHA-256.
    #[serde(default)]
    pub checksum_url: Option<String>,
    /// Path of the executable inside the archive.
    #[serde(default)]
    pub executable_in_archive: Option<String>,
}

impl BinaryDescriptor {
    /// Expands every template of this descriptor for a concrete platform.
    pub fn resolve(&self, tool: &ToolSpec, os: &str, arch: &str) -> Result<ResolvedBinary> {
        let vars = [
            ("version", tool.version.as_str()),
            ("name", tool.name.as_str()),
            ("os", os),
            ("arch", arch),
        ];

        let url = template::render(&self.url, &vars)?;
        let archive_filename = archive_filename(&url);
        let checksum_url = self
            .checksum_url
            .as_deref()
            .map(|t| template::render(t, &vars))
            .transpose()?;
        let executable_in_archive = template::render(
            self.executable_in_archive
                .as_deref()
                .unwrap_or(tool.executable_name()),
            &vars,
        )?;
        let release_checksums_url = tool
            .checksum_info
            .as_ref()
            .and_then(|info| info.release_checksums_file.as_deref())
            .map(|file| {
                let file = template::render(file, &vars)?;
                Ok::<_, StageError>(sibling_url(&url, &file))
            })
            .transpose()?;

        Ok(ResolvedBinary {
            url,
            archive_filename,
            checksum_url,
            release_checksums_url,
            executable_in_archive,
        })
    }
}

/// Release-level checksum hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChecksumInfo {
    /// File name, published next to the artifacts, listing every artifact's digest.
    #[serde(default)]
    pub release_checksums_file: Option<String>,
}

/// A descriptor with every template expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinary {
    pub url: String,
    /// Last path segment of `url`.
    pub archive_filename: String,
    pub checksum_url: Option<String>,
    /// The release-wide checksum file, resolved next to `url`.
    pub release_checksums_url: Option<String>,
    pub executable_in_archive: String,
}

fn archive_filename(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| url.rsplit('/').next().unwrap_or(url).to_string())
}

/// `file` placed in the same directory as `url`.
fn sibling_url(url: &str, file: &str) -> String {
    match Url::parse(url).and_then(|u| u.join(file)) {
        Ok(joined) => joined.to_string(),
        Err(_) => match url.rsplit_once('/') {
            Some((base, _)) => format!("{}/{}", base, file),
            None => file.to_string(),
        },
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Str(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Str(s) => s,
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => f.to_string(),
    })
}

pub(crate) fn optional_string_or_number<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "string_or_number")] String);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(s)| s))
}

// ============================================================================
// Digests
// ============================================================================

/// A SHA-256 digest in its normalised `sha256:<lowercase-hex>` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Sha256Digest(String);

impl Sha256Digest {
    pub const PREFIX: &'static str = "sha256:";

    /// Normalises a bare hex string or an already-tagged digest.
    pub fn from_hex(hex: &str) -> Self {
        let trimmed = hex.trim();
        let bare = trimmed.strip_prefix(Self::PREFIX).unwrap_or(trimmed);
        Self(format!("{}{}", Self::PREFIX, bare.to_lowercase()))
    }

    /// The hex part without the algorithm tag.
    pub fn hex(&self) -> &str {
        &self.0[Self::PREFIX.len()..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the computed hex digest matches this expected digest.
    pub fn matches(&self, actual_hex: &str) -> bool {
        !actual_hex.is_empty() && self.0.ends_with(&actual_hex.to_lowercase())
    }

    /// True for exactly 64 hex characters.
    pub fn is_well_formed(&self) -> bool {
        let hex = self.hex();
        hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit())
    }
}

impl From<String> for Sha256Digest {
    fn from(value: String) -> Self {
        Self::from_hex(&value)
    }
}

impl From<Sha256Digest> for String {
    fn from(value: Sha256Digest) -> Self {
        value.0
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Archive Formats
// ============================================================================

/// Format of a downloaded artifact, inferred from its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Gzip-compressed tar archive (.tar.gz, .tgz)
    TarGz,
    /// XZ-compressed tar archive (.tar.xz)
    TarXz,
    /// ZIP archive (.zip)
    Zip,
    /// Anything else: the download is the executable itself.
    Raw,
}

impl ArchiveFormat {
    /// Glob patterns of the formats that are real archives.
    pub const ARCHIVE_PATTERNS: &'static [&'static str] = &["*.zip", "*.tar.gz", "*.tgz", "*.tar.xz"];

    /// Infers the format from a URL or file name.
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Self::TarGz
        } else if lower.ends_with(".tar.xz") {
            Self::TarXz
        } else if lower.ends_with(".zip") {
            Self::Zip
        } else {
            Self::Raw
        }
    }

    /// Returns true if the format requires extraction.
    pub fn is_archive(&self) -> bool {
        !matches!(self, Self::Raw)
    }
}
