//! Environment helpers for running staged tools.
//!
//! Completion commands are executed with the staged binary's directory (and
//! a shim directory exposing it under its plain name) in front of PATH.

use std::path::PathBuf;
use tokio::process::Command;

/// Returns the PATH separator for the current platform.
#[inline]
fn path_separator() -> &'static str {
    #[cfg(windows)]
    {
        ";"
    }
    #[cfg(not(windows))]
    {
        ":"
    }
}

/// Prepends `dirs` to an existing PATH value (or the process PATH).
pub fn prepend_to_path(dirs: &[PathBuf], existing: Option<&str>) -> String {
    let base_path = existing
        .map(|s| s.to_string())
        .or_else(|| std::env::var("PATH").ok())
        .unwrap_or_default();

    let mut entries: Vec<String> = Vec::new();
    for dir in dirs {
        if let Some(s) = dir.to_str() {
            if !entries.iter().any(|e| e == s) {
                entries.push(s.to_string());
            }
        }
    }

    if entries.is_empty() {
        return base_path;
    }

    let sep = path_separator();
    let prefix = entries.join(sep);

    if base_path.is_empty() {
        prefix
    } else {
        format!("{}{}{}", prefix, sep, base_path)
    }
}

/// Sets PATH on a command with `dirs` in front.
pub fn apply_to_command(cmd: &mut Command, dirs: &[PathBuf]) {
    cmd.env("PATH", prepend_to_path(dirs, None));
}
