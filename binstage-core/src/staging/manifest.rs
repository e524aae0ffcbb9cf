//! Tool manifest loading.
//!
//! The manifest is the role's `defaults/main.yml`. Tools are read from the
//! configured key (default `terminal_setup_tools`), falling back to
//! `<key>_defaults` when the key is missing or empty. Individual entries that
//! cannot be decoded are skipped with a warning; only an unreadable or
//! structurally invalid document is an error.

use serde_yaml::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use super::types::ToolSpec;
use crate::config::Settings;
use crate::error::{Result, StageError};

/// The tools declared by a role, in manifest order.
#[derive(Debug, Clone, Default)]
pub struct ToolManifest {
    pub tools: Vec<ToolSpec>,
}

impl ToolManifest {
    /// Looks a tool up by name.
    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// Loads the tool manifest described by `settings`.
pub fn load_tool_manifest(settings: &Settings) -> Result<ToolManifest> {
    load_tool_manifest_from(
        &settings.defaults_file,
        &settings.tools_key,
        &settings.fallback_tools_key(),
    )
}

/// Loads the manifest from a specific path.
pub fn load_tool_manifest_from(path: &Path, key: &str, fallback_key: &str) -> Result<ToolManifest> {
    let content = fs::read_to_string(path)
        .map_err(|e| StageError::manifest(path, format!("failed to read: {}", e)))?;
    parse_tool_manifest(&content, path, key, fallback_key)
}

/// Parses manifest text. `path` is only used in diagnostics.
pub fn parse_tool_manifest(
    content: &str,
    path: &Path,
    key: &str,
    fallback_key: &str,
) -> Result<ToolManifest> {
    if content.trim().is_empty() {
        warn!("Manifest {} is empty", path.display());
        return Ok(ToolManifest::default());
    }

    let document: Value = serde_yaml::from_str(content)
        .map_err(|e| StageError::manifest(path, format!("invalid YAML: {}", e)))?;

    let mapping = match document {
        Value::Mapping(mapping) => mapping,
        Value::Null => {
            warn!("Manifest {} is empty", path.display());
            return Ok(ToolManifest::default());
        }
        _ => return Err(StageError::manifest(path, "top level is not a mapping")),
    };

    let entries = match non_empty_list(mapping.get(key)) {
        Some(list) => list,
        None => {
            debug!("'{}' not found in manifest, falling back to '{}'", key, fallback_key);
            match mapping.get(fallback_key) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Sequence(list)) => list.clone(),
                Some(_) => {
                    return Err(StageError::manifest(
                        path,
                        format!("'{}' is not a list", fallback_key),
                    ))
                }
            }
        }
    };

    let tools = entries
        .into_iter()
        .filter_map(|entry| decode_tool(entry, path))
        .collect();

    Ok(ToolManifest { tools })
}

fn non_empty_list(value: Option<&Value>) -> Option<Vec<Value>> {
    match value {
        Some(Value::Sequence(list)) if !list.is_empty() => Some(list.clone()),
        _ => None,
    }
}

fn decode_tool(entry: Value, path: &Path) -> Option<ToolSpec> {
    if !entry.is_mapping() {
        warn!("Skipping non-mapping entry in tools list: {:?}", entry);
        return None;
    }

    let is_binary = entry.get("install_type").and_then(Value::as_str) == Some("binary");
    let label = entry
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string();

    match serde_yaml::from_value::<ToolSpec>(entry) {
        Ok(tool) => Some(tool),
        Err(e) if is_binary => {
            warn!("Skipping tool '{}' in {}: {}", label, path.display(), e);
            None
        }
        Err(e) => {
            debug!("Ignoring undecodable non-binary entry '{}': {}", label, e);
            None
        }
    }
}
