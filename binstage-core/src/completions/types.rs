//! Completions manifest entries.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Shells completion scripts are harvested for, in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Shell {
    Zsh,
    Bash,
    Fish,
}

impl Shell {
    pub const ALL: [Shell; 3] = [Shell::Zsh, Shell::Bash, Shell::Fish];

    /// Manifest key and output subdirectory name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zsh => "zsh",
            Self::Bash => "bash",
            Self::Fish => "fish",
        }
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one completion script is produced.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ShellMethod {
    /// Run a command and capture its stdout.
    Cli {
        command: String,
        output: String,
        #[serde(default)]
        post_process: Vec<PostProcessRule>,
    },
    /// Download a file.
    Url { url: String, output: String },
    /// Copy a member out of the tool's staged archive.
    Archive { archive_path: String, output: String },
    /// Installed by a shell plugin manager; nothing to stage.
    Plugin,
    /// Explicitly nothing to do.
    #[serde(rename = "none")]
    Skip,
}

impl ShellMethod {
    /// Output file name, for the methods that produce one.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Cli { output, .. } | Self::Url { output, .. } | Self::Archive { output, .. } => {
                Some(output)
            }
            Self::Plugin | Self::Skip => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cli { .. } => "cli",
            Self::Url { .. } => "url",
            Self::Archive { .. } => "archive",
            Self::Plugin => "plugin",
            Self::Skip => "none",
        }
    }
}

/// Text filter applied to captured CLI output, in declared order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PostProcessRule {
    /// Drop every line containing any of the substrings.
    RemoveLinesContaining { patterns: Vec<String> },
    /// Drop every line matching any of the regular expressions.
    RemoveLinesMatching { patterns: Vec<String> },
}

/// Completion methods declared for one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEntry {
    pub name: String,
    /// Overrides the version from the tool manifest.
    pub version: Option<String>,
    pub methods: BTreeMap<Shell, Vec<ShellMethod>>,
}
