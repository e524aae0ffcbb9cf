//! Subprocess runner for `cli` completion methods.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

use crate::error::{IoContext, Result, StageError};
use crate::staging::env::apply_to_command;

/// Maximum characters of stderr quoted in an error.
const MAX_STDERR_CHARS: usize = 2_000;

/// A staged executable to expose on PATH under its plain name.
#[derive(Debug, Clone)]
pub struct StagedCommand {
    /// Versioned file, e.g. `<files>/linux/x86_64/rg/14.1.0/rg-14.1.0`.
    pub binary: PathBuf,
    /// Name the command line refers to it by, e.g. `rg`.
    pub executable_name: String,
}

/// Runs completion commands through `sh -c` with a timeout.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
    scratch_root: PathBuf,
}

impl CommandRunner {
    /// Shim directories are created under `scratch_root`.
    pub fn new(timeout: Duration, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            timeout,
            scratch_root: scratch_root.into(),
        }
    }

    /// Runs `command` and returns its stdout.
    ///
    /// With a staged executable, a scoped shim directory holding a
    /// `<executable_name>` symlink and the binary's own directory go in front
    /// of PATH. Non-zero exit, spawn failure and timeout are
    /// [`StageError::Subprocess`].
    pub async fn run(&self, command: &str, staged: Option<&StagedCommand>) -> Result<Vec<u8>> {
        // Held until the command finishes.
        let shim = match staged {
            Some(staged) => Some(self.create_shim(staged)?),
            None => None,
        };

        let mut path_dirs = Vec::new();
        if let (Some(shim), Some(staged)) = (&shim, staged) {
            path_dirs.push(shim.path().to_path_buf());
            if let Some(dir) = staged.binary.parent() {
                path_dirs.push(dir.to_path_buf());
            }
            info!("Using staged binary: {}", staged.binary.display());
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        apply_to_command(&mut cmd, &path_dirs);

        // Set headless environment
        cmd.env("TERM", "dumb");
        cmd.env("NO_COLOR", "1");
        cmd.env("CLICOLOR", "0");

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!("Executing `{}`", command);
        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(StageError::subprocess(command, format!("failed to spawn: {}", e))),
            Err(_) => {
                return Err(StageError::subprocess(
                    command,
                    format!("timed out after {:?}", self.timeout),
                ))
            }
        };

        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.len() > MAX_STDERR_CHARS {
                let cut = (0..=MAX_STDERR_CHARS)
                    .rev()
                    .find(|i| stderr.is_char_boundary(*i))
                    .unwrap_or(0);
                stderr.truncate(cut);
                stderr.push_str(" [truncated]");
            }
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(StageError::subprocess(
                command,
                format!("exit status {}: {}", code, stderr),
            ));
        }

        Ok(output.stdout)
    }

    fn create_shim(&self, staged: &StagedCommand) -> Result<tempfile::TempDir> {
        std::fs::create_dir_all(&self.scratch_root).at(&self.scratch_root)?;
        let shim = tempfile::Builder::new()
            .prefix("shim-")
            .tempdir_in(&self.scratch_root)
            .at(&self.scratch_root)?;
        let link = shim.path().join(&staged.executable_name);
        link_executable(&staged.binary, &link)?;
        Ok(shim)
    }
}

#[cfg(unix)]
fn link_executable(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).at(link)
}

#[cfg(not(unix))]
fn link_executable(target: &Path, link: &Path) -> Result<()> {
    std::fs::copy(target, link).at(link).map(|_| ())
}
