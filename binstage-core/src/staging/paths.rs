//! Staged file layout.
//!
//! Binaries live at `<files>/<os>/<arch>/<tool>/<version>/<executable>-<version>`
//! where `<os>` is lowercased. Retained archives sit next to the binary in the
//! same version directory.

use std::path::{Path, PathBuf};

use super::types::ToolSpec;

/// Directory holding everything staged for one tool version on one platform.
///
/// Path: `{files}/{os}/{arch}/{tool}/{version}/`
pub fn staged_version_dir(files_dir: &Path, tool: &ToolSpec, os: &str, arch: &str) -> PathBuf {
    version_dir(files_dir, os, arch, &tool.name, &tool.version)
}

/// [`staged_version_dir`] for a bare name and version.
pub fn version_dir(files_dir: &Path, os: &str, arch: &str, name: &str, version: &str) -> PathBuf {
    files_dir
        .join(os.to_lowercase())
        .join(arch)
        .join(name)
        .join(version)
}

/// File name of the staged executable: `{executable}-{version}`.
pub fn versioned_executable_name(tool: &ToolSpec) -> String {
    format!("{}-{}", tool.executable_name(), tool.version)
}

/// Full path of the staged executable.
///
/// Existence of this path marks the (tool, version, os, arch) combination as
/// provisioned.
pub fn staged_binary_path(files_dir: &Path, tool: &ToolSpec, os: &str, arch: &str) -> PathBuf {
    staged_version_dir(files_dir, tool, os, arch).join(versioned_executable_name(tool))
}

/// Output path of a completion script: `{completions}/{shell}/{output}`.
pub fn completion_output_path(completions_dir: &Path, shell: &str, output: &str) -> PathBuf {
    completions_dir.join(shell).join(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::types::InstallType;
    use std::collections::BTreeMap;

    fn tool(name: &str, version: &str, executable_name: Option<&str>) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            version: version.to_string(),
            install_type: InstallType::Binary,
            executable_name: executable_name.map(str::to_string),
            binaries: BTreeMap::new(),
            checksum_info: None,
        }
    }

    #[test]
    fn test_staged_binary_path() {
        let path = staged_binary_path(Path::new("/files"), &tool("foo", "1.2.3", None), "linux", "x86_64");
        assert_eq!(path, PathBuf::from("/files/linux/x86_64/foo/1.2.3/foo-1.2.3"));
    }

    #[test]
    fn test_os_is_lowercased() {
        let path = staged_binary_path(Path::new("/files"), &tool("foo", "1", None), "Darwin", "aarch64");
        assert!(path.starts_with("/files/darwin/aarch64"));
    }

    #[test]
    fn test_executable_name_override() {
        let t = tool("ripgrep", "14.1.0", Some("rg"));
        assert_eq!(versioned_executable_name(&t), "rg-14.1.0");
        let path = staged_binary_path(Path::new("/f"), &t, "linux", "x86_64");
        assert!(path.ends_with("ripgrep/14.1.0/rg-14.1.0"));
    }

    #[test]
    fn test_completion_output_path() {
        assert_eq!(
            completion_output_path(Path::new("/files/completions"), "zsh", "_rg"),
            PathBuf::from("/files/completions/zsh/_rg")
        );
    }
}
