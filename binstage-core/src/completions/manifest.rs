//! Completions manifest loading.
//!
//! The manifest lives at `files/completions_metadata.yml`:
//!
//! ```yaml
//! completions:
//!   - name: ripgrep
//!     zsh:
//!       - method: archive
//!         archive_path: "ripgrep-{version}/complete/_rg"
//!         output: _rg
//!     bash:
//!       method: cli
//!       command: "rg --generate complete-bash"
//!       output: rg.bash
//! ```
//!
//! `archive_path` accepts the `{version}`, `{name}`, `{os}` and `{arch}`
//! placeholders, expanded for the host platform.
//!
//! A shell may hold one method mapping or a list of them. Entries and methods
//! that cannot be decoded are skipped with a warning.

use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use super::types::{CompletionEntry, Shell, ShellMethod};
use crate::error::{Result, StageError};
use crate::staging::types::optional_string_or_number;

/// Top-level key of the completions manifest.
const COMPLETIONS_KEY: &str = "completions";

/// Every completion entry, in manifest order.
#[derive(Debug, Clone, Default)]
pub struct CompletionsManifest {
    pub entries: Vec<CompletionEntry>,
}

#[derive(Deserialize)]
struct EntryHeader {
    name: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    version: Option<String>,
}

/// Loads the completions manifest. A missing file yields `None`.
pub fn load_completions_manifest(path: &Path) -> Result<Option<CompletionsManifest>> {
    if !path.exists() {
        info!("No completions manifest at {}, skipping completions", path.display());
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .map_err(|e| StageError::manifest(path, format!("failed to read: {}", e)))?;
    parse_completions_manifest(&content, path).map(Some)
}

/// Parses manifest text. `path` is only used in diagnostics.
pub fn parse_completions_manifest(content: &str, path: &Path) -> Result<CompletionsManifest> {
    if content.trim().is_empty() {
        return Ok(CompletionsManifest::default());
    }

    let document: Value = serde_yaml::from_str(content)
        .map_err(|e| StageError::manifest(path, format!("invalid YAML: {}", e)))?;

    let list = match &document {
        Value::Null => return Ok(CompletionsManifest::default()),
        Value::Mapping(mapping) => match mapping.get(COMPLETIONS_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(list)) => list.clone(),
            Some(_) => {
                return Err(StageError::manifest(
                    path,
                    format!("'{}' is not a list", COMPLETIONS_KEY),
                ))
            }
        },
        _ => return Err(StageError::manifest(path, "top level is not a mapping")),
    };

    let entries = list.iter().filter_map(decode_entry).collect();
    Ok(CompletionsManifest { entries })
}

fn decode_entry(value: &Value) -> Option<CompletionEntry> {
    let header = match serde_yaml::from_value::<EntryHeader>(value.clone()) {
        Ok(header) => header,
        Err(e) => {
            warn!("Skipping completion entry: {}", e);
            return None;
        }
    };

    let mut methods = BTreeMap::new();
    for shell in Shell::ALL {
        let declared = match value.get(shell.as_str()) {
            None | Some(Value::Null) => continue,
            Some(Value::Sequence(items)) => items.clone(),
            Some(single) => vec![single.clone()],
        };

        let decoded: Vec<ShellMethod> = declared
            .into_iter()
            .filter(|item| !item.is_null())
            .filter_map(|item| match serde_yaml::from_value::<ShellMethod>(item) {
                Ok(method) => Some(method),
                Err(e) => {
                    warn!(
                        "Skipping {} completion method for '{}': {}",
                        shell, header.name, e
                    );
                    None
                }
            })
            .collect();

        if !decoded.is_empty() {
            methods.insert(shell, decoded);
        }
    }

    debug!("Completion entry '{}' declares {} shell(s)", header.name, methods.len());
    Some(CompletionEntry {
        name: header.name,
        version: header.version,
        methods,
    })
}
