//! Binstage Core Library
//!
//! This crate stages third-party command-line tools for a
//! configuration-management role. It includes:
//!
//! - Role layout and runtime settings
//! - Tool manifest loading with per-platform binary descriptors
//! - Checksum resolution (checksum URL, release checksum file, computed)
//! - A persistent checksum cache
//! - Verified downloads and archive extraction into the role's `files/` tree
//! - Shell completion harvesting from commands, URLs and staged archives

pub mod completions;
pub mod config;
pub mod error;
pub mod staging;

// Re-exports for convenience
pub use config::{HostPlatform, Settings, DEFAULT_TOOLS_KEY};
pub use error::{Result, StageError};

// Re-export the provisioning side
pub use staging::{
    load_tool_manifest, ChecksumCache, HttpTransport, ProvisionSummary, RunContext,
    ToolManifest, ToolProvisioner, Transport,
};

// Re-export the completion side
pub use completions::{load_completions_manifest, CompletionHarvester, HarvestSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
