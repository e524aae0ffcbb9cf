//! Binary staging for a configuration-management role.
//!
//! Reads the role's tool manifest and, for every binary tool and declared
//! platform, downloads the release artifact, verifies it against a SHA-256
//! digest and places the executable under the role's `files/` tree.
//!
//! # Architecture
//!
//! - `types`: Manifest entries, digests and archive formats
//! - `template`: `{placeholder}` expansion for URLs and archive paths
//! - `manifest`: Tool manifest loading from `defaults/main.yml`
//! - `paths`: Staged file layout
//! - `downloader`: HTTP transport, downloads and SHA-256 verification
//! - `checksum`: Expected-digest resolution strategies
//! - `cache`: Persistent checksum cache
//! - `extractor`: Archive extraction and executable placement
//! - `env`: PATH handling for running staged tools
//! - `context`: Per-run state
//! - `pipeline`: The provisioning loop
//!
//! # Example
//!
//! ```ignore
//! use binstage_core::config::Settings;
//! use binstage_core::staging::{
//!     load_tool_manifest, ChecksumCache, HttpTransport, RunContext, ToolProvisioner,
//! };
//!
//! let settings = Settings::for_role("roles/terminal_setup")?;
//! let manifest = load_tool_manifest(&settings)?;
//! let mut ctx = RunContext::new(ChecksumCache::load(&settings.checksums_file)?);
//!
//! let transport = Arc::new(HttpTransport::new(settings.http_timeout)?);
//! ToolProvisioner::new(&settings, transport).run(&manifest, &mut ctx).await;
//! ctx.cache_mut().save_if_dirty()?;
//! ```

pub mod cache;
pub mod checksum;
pub mod context;
pub mod downloader;
pub mod env;
pub mod extractor;
pub mod manifest;
pub mod paths;
pub mod pipeline;
pub mod template;
pub mod types;

// Re-export commonly used types
pub use cache::ChecksumCache;
pub use checksum::{ChecksumResolver, ChecksumSource, ResolvedChecksum};
pub use context::RunContext;
pub use downloader::{sha256_bytes, sha256_file, ContentFetcher, HttpTransport, Transport};
pub use env::prepend_to_path;
pub use extractor::{make_executable, read_member, ArchiveExtractor};
pub use manifest::{load_tool_manifest, load_tool_manifest_from, ToolManifest};
pub use pipeline::{Outcome, ProvisionSummary, ToolProvisioner};
pub use types::{
    ArchiveFormat, BinaryDescriptor, ChecksumInfo, InstallType, ResolvedBinary, Sha256Digest,
    ToolSpec,
};
