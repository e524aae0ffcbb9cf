//! Shell completion harvesting.
//!
//! Reads `files/completions_metadata.yml` and stages one completion script per
//! declared (tool, shell, method) under `files/completions/<shell>/`.
//!
//! - `types`: Completion entries, shells, methods and post-process rules
//! - `manifest`: Completions manifest loading
//! - `postprocess`: Line filters for captured command output
//! - `command`: `sh -c` runner with the staged binary on PATH
//! - `harvester`: Per-method dispatch and change-aware writes

pub mod command;
pub mod harvester;
pub mod manifest;
pub mod postprocess;
pub mod types;

pub use command::{CommandRunner, StagedCommand};
pub use harvester::{CompletionHarvester, HarvestSummary};
pub use manifest::{load_completions_manifest, parse_completions_manifest, CompletionsManifest};
pub use types::{CompletionEntry, PostProcessRule, Shell, ShellMethod};
