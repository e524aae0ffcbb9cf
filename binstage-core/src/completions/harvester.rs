//! Completion Harvester.
//!
//! Runs after the provisioning pipeline. For every (tool, shell, method) it
//! produces a completion script from a command, a URL or the tool's staged
//! archive and writes it to `<completions>/<shell>/<output>`. Files are only
//! rewritten when their content changes. Failures are logged per method.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::command::{CommandRunner, StagedCommand};
use super::manifest::CompletionsManifest;
use super::postprocess;
use super::types::{CompletionEntry, Shell, ShellMethod};
use crate::config::{HostPlatform, Settings};
use crate::error::{IoContext, Result, StageError};
use crate::staging::downloader::{ContentFetcher, Transport};
use crate::staging::extractor::read_member;
use crate::staging::manifest::ToolManifest;
use crate::staging::paths;
use crate::staging::template;
use crate::staging::types::ArchiveFormat;
use crate::staging::RunContext;

/// Tally of a harvesting run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    pub written: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Produces completion scripts for staged tools.
#[derive(Debug)]
pub struct CompletionHarvester<'a> {
    tools: &'a ToolManifest,
    files_dir: PathBuf,
    completions_dir: PathBuf,
    platform: HostPlatform,
    fetcher: ContentFetcher,
    runner: CommandRunner,
}

impl<'a> CompletionHarvester<'a> {
    /// `tools` supplies versions and executable names for completion entries.
    pub fn new(settings: &Settings, tools: &'a ToolManifest, transport: Arc<dyn Transport>) -> Self {
        Self {
            tools,
            files_dir: settings.files_dir.clone(),
            completions_dir: settings.completions_dir.clone(),
            platform: HostPlatform::detect(),
            fetcher: ContentFetcher::new(transport, settings.scratch_dir.join("downloads")),
            runner: CommandRunner::new(settings.command_timeout, &settings.scratch_dir),
        }
    }

    /// Overrides the detected host platform.
    pub fn with_platform(mut self, platform: HostPlatform) -> Self {
        self.platform = platform;
        self
    }

    pub async fn run(&self, manifest: &CompletionsManifest, ctx: &mut RunContext) -> HarvestSummary {
        let mut summary = HarvestSummary::default();

        for entry in &manifest.entries {
            for (shell, methods) in &entry.methods {
                for method in methods {
                    match self.harvest(entry, *shell, method).await {
                        Ok(Some(true)) => {
                            ctx.mark_changed();
                            summary.written += 1;
                        }
                        Ok(Some(false)) => summary.unchanged += 1,
                        Ok(None) => summary.skipped += 1,
                        Err(e) => {
                            error!(
                                "Failed to stage {} completion for {} ({}): {}",
                                method.kind(),
                                entry.name,
                                shell,
                                e
                            );
                            summary.failed += 1;
                        }
                    }
                }
            }
        }

        info!(
            "Completions done: {} written, {} unchanged, {} skipped, {} failed",
            summary.written, summary.unchanged, summary.skipped, summary.failed
        );
        summary
    }

    /// `Some(true)` when the output file was written, `None` for no-op methods.
    async fn harvest(&self, entry: &CompletionEntry, shell: Shell, method: &ShellMethod) -> Result<Option<bool>> {
        let (output, content) = match method {
            ShellMethod::Cli {
                command,
                output,
                post_process,
            } => {
                let output = self.output_path(shell, output)?;
                info!("Running '{}' for {} ({}), writing to {}", command, entry.name, shell, output.display());
                let staged = self.staged_command(entry);
                let stdout = self.runner.run(command, staged.as_ref()).await?;
                let content = if post_process.is_empty() {
                    stdout
                } else {
                    let text = String::from_utf8_lossy(&stdout);
                    postprocess::apply(&text, post_process)?.into_bytes()
                };
                (output, content)
            }
            ShellMethod::Url { url, output } => {
                let output = self.output_path(shell, output)?;
                info!("Downloading {} for {} ({}), saving to {}", url, entry.name, shell, output.display());
                (output, self.fetcher.fetch_bytes(url).await?)
            }
            ShellMethod::Archive { archive_path, output } => {
                let output = self.output_path(shell, output)?;
                let member = self.render(entry, archive_path)?;
                let archive = self.staged_archive(entry)?;
                info!(
                    "Extracting {} from {} for {} ({}), writing to {}",
                    member,
                    archive.display(),
                    entry.name,
                    shell,
                    output.display()
                );
                (output, read_member(&archive, &member)?)
            }
            ShellMethod::Plugin | ShellMethod::Skip => {
                debug!("{} completion for {} ({}) handled elsewhere", method.kind(), entry.name, shell);
                return Ok(None);
            }
        };

        write_if_changed(&output, &content).map(Some)
    }

    fn output_path(&self, shell: Shell, output: &str) -> Result<PathBuf> {
        let relative = Path::new(output);
        let plain = !output.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(StageError::manifest(
                &self.completions_dir,
                format!("output '{}' must be a relative path inside the shell directory", output),
            ));
        }
        Ok(paths::completion_output_path(&self.completions_dir, shell.as_str(), output))
    }

    /// Version from the entry, falling back to the tool manifest.
    fn version_of<'e>(&'e self, entry: &'e CompletionEntry) -> Option<&'e str> {
        entry
            .version
            .as_deref()
            .or_else(|| self.tools.tool(&entry.name).map(|t| t.version.as_str()))
    }

    fn require_version<'e>(&'e self, entry: &'e CompletionEntry) -> Result<&'e str> {
        self.version_of(entry).ok_or_else(|| {
            StageError::manifest(&self.files_dir, format!("no version known for '{}'", entry.name))
        })
    }

    /// Expands `{version}`, `{name}`, `{os}` and `{arch}` for the host platform.
    fn render(&self, entry: &CompletionEntry, text: &str) -> Result<String> {
        let vars = [
            ("version", self.require_version(entry)?),
            ("name", entry.name.as_str()),
            ("os", self.platform.os.as_str()),
            ("arch", self.platform.arch.as_str()),
        ];
        template::render(text, &vars)
    }

    fn version_dir(&self, entry: &CompletionEntry) -> Option<PathBuf> {
        let version = self.version_of(entry)?;
        Some(paths::version_dir(
            &self.files_dir,
            &self.platform.os,
            &self.platform.arch,
            &entry.name,
            version,
        ))
    }

    /// The staged executable for the host platform, if present.
    fn staged_command(&self, entry: &CompletionEntry) -> Option<StagedCommand> {
        let version = self.version_of(entry)?;
        let executable_name = self
            .tools
            .tool(&entry.name)
            .map(|t| t.executable_name().to_string())
            .unwrap_or_else(|| entry.name.clone());
        let binary = self
            .version_dir(entry)?
            .join(format!("{}-{}", executable_name, version));

        if binary.is_file() {
            Some(StagedCommand {
                binary,
                executable_name,
            })
        } else {
            debug!("No staged binary for {} at {}", entry.name, binary.display());
            None
        }
    }

    /// First archive in the staged version directory, by pattern then name.
    fn staged_archive(&self, entry: &CompletionEntry) -> Result<PathBuf> {
        let version_dir = paths::version_dir(
            &self.files_dir,
            &self.platform.os,
            &self.platform.arch,
            &entry.name,
            self.require_version(entry)?,
        );

        if !version_dir.is_dir() {
            return Err(no_archive(entry, version_dir));
        }

        // Only the file name part is a pattern; the directory is taken literally.
        let prefix = glob::Pattern::escape(&version_dir.to_string_lossy());
        for pattern in ArchiveFormat::ARCHIVE_PATTERNS {
            let full = Path::new(&prefix).join(pattern);
            let matches = glob::glob(&full.to_string_lossy())
                .map_err(|e| StageError::extraction(&version_dir, e))?;
            if let Some(found) = matches.filter_map(|m| m.ok()).find(|p| p.is_file()) {
                return Ok(found);
            }
        }

        Err(no_archive(entry, version_dir))
    }
}

fn no_archive(entry: &CompletionEntry, searched: PathBuf) -> StageError {
    StageError::NotFound {
        member: format!("a staged archive for {}", entry.name),
        archive: searched,
    }
}

/// Writes `content` unless the file already holds exactly these bytes.
fn write_if_changed(path: &Path, content: &[u8]) -> Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if existing == content {
            debug!("{} is up to date", path.display());
            return Ok(false);
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    fs::write(path, content).at(path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completions::manifest::parse_completions_manifest;
    use crate::staging::cache::ChecksumCache;
    use crate::staging::downloader::testing::MemoryTransport;
    use crate::staging::extractor::fixtures::write_tar_gz;
    use crate::staging::manifest::parse_tool_manifest;
    use tempfile::TempDir;

    const TOOLS: &str = r#"
terminal_setup_tools:
  - name: zoxide
    version: "0.9.4"
    install_type: binary
  - name: ripgrep
    version: "14.1.0"
    install_type: binary
    executable_name: rg
"#;

    struct Fixture {
        temp_dir: TempDir,
        settings: Settings,
        tools: ToolManifest,
        transport: Arc<MemoryTransport>,
    }

    fn fixture() -> Fixture {
        fixture_at("role")
    }

    fn fixture_at(role: &str) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::with_layout(temp_dir.path().join(role))
            .with_scratch_dir(temp_dir.path().join("scratch"));
        let tools = parse_tool_manifest(
            TOOLS,
            Path::new("main.yml"),
            &settings.tools_key,
            &settings.fallback_tools_key(),
        )
        .unwrap();
        Fixture {
            temp_dir,
            settings,
            tools,
            transport: MemoryTransport::new(),
        }
    }

    fn completions(yaml: &str) -> CompletionsManifest {
        parse_completions_manifest(yaml, Path::new("completions_metadata.yml")).unwrap()
    }

    fn harvester(fx: &Fixture) -> CompletionHarvester<'_> {
        CompletionHarvester::new(&fx.settings, &fx.tools, fx.transport.clone())
            .with_platform(HostPlatform::new("linux", "x86_64"))
    }

    fn new_ctx(fx: &Fixture) -> RunContext {
        RunContext::new(ChecksumCache::empty(&fx.settings.checksums_file))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_output_is_post_processed() {
        let fx = fixture();
        let manifest = completions(
            r#"
completions:
  - name: zoxide
    zsh:
      method: cli
      command: "printf 'function __zoxide_z() {}\n  eval \"$(zoxide init zsh)\"\ncompdef __zoxide_z z\n'"
      output: zoxide.zsh
      post_process:
        - rule: remove_lines_containing
          patterns: ["eval "]
"#,
        );

        let mut ctx = new_ctx(&fx);
        let summary = harvester(&fx).run(&manifest, &mut ctx).await;

        assert_eq!(summary.written, 1);
        assert!(ctx.changed());
        let written = fs::read_to_string(fx.settings.completions_dir.join("zsh/zoxide.zsh")).unwrap();
        assert_eq!(written, "function __zoxide_z() {}\ncompdef __zoxide_z z\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_uses_staged_binary() {
        use crate::staging::extractor::make_executable;

        let fx = fixture();
        let version_dir = fx.settings.files_dir.join("linux/x86_64/ripgrep/14.1.0");
        fs::create_dir_all(&version_dir).unwrap();
        let binary = version_dir.join("rg-14.1.0");
        fs::write(&binary, "#!/bin/sh\necho \"complete -F _rg $2\"\n").unwrap();
        make_executable(&binary).unwrap();

        let manifest = completions(
            r#"
completions:
  - name: ripgrep
    bash:
      method: cli
      command: "rg --generate rg"
      output: rg.bash
"#,
        );

        let mut ctx = new_ctx(&fx);
        harvester(&fx).run(&manifest, &mut ctx).await;

        let written = fs::read_to_string(fx.settings.completions_dir.join("bash/rg.bash")).unwrap();
        assert_eq!(written, "complete -F _rg rg\n");
    }

    #[tokio::test]
    async fn test_url_method_and_unchanged_rerun() {
        let fx = fixture();
        fx.transport.serve("https://example.com/_zoxide", "#compdef zoxide\n");
        let manifest = completions(
            r#"
completions:
  - name: zoxide
    zsh:
      - method: url
        url: "https://example.com/_zoxide"
        output: _zoxide
    fish:
      method: plugin
"#,
        );
        let harvester = harvester(&fx);

        let mut first = new_ctx(&fx);
        let summary = harvester.run(&manifest, &mut first).await;
        assert_eq!(summary.written, 1);
        assert_eq!(summary.skipped, 1);
        assert!(first.changed());
        assert_eq!(
            fs::read(fx.settings.completions_dir.join("zsh/_zoxide")).unwrap(),
            b"#compdef zoxide\n"
        );

        let mut second = new_ctx(&fx);
        let summary = harvester.run(&manifest, &mut second).await;
        assert_eq!(summary.unchanged, 1);
        assert!(!second.changed());
    }

    #[tokio::test]
    async fn test_archive_method_reads_staged_archive() {
        let fx = fixture();
        let version_dir = fx.settings.files_dir.join("linux/x86_64/ripgrep/14.1.0");
        fs::create_dir_all(&version_dir).unwrap();
        write_tar_gz(
            &version_dir.join("ripgrep-14.1.0-x86_64-unknown-linux-musl.tar.gz"),
            &[("ripgrep-14.1.0/complete/_rg", b"#compdef rg\n")],
        );

        let manifest = completions(
            r#"
completions:
  - name: ripgrep
    zsh:
      method: archive
      archive_path: ripgrep-14.1.0/complete/_rg
      output: _rg
    bash:
      method: archive
      archive_path: ripgrep-14.1.0/complete/rg.bash
      output: rg.bash
"#,
        );

        let mut ctx = new_ctx(&fx);
        let summary = harvester(&fx).run(&manifest, &mut ctx).await;

        assert_eq!(summary.written, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            fs::read(fx.settings.completions_dir.join("zsh/_rg")).unwrap(),
            b"#compdef rg\n"
        );
        assert!(!fx.settings.completions_dir.join("bash/rg.bash").exists());
    }

    #[tokio::test]
    async fn test_archive_path_placeholders_are_expanded() {
        let fx = fixture();
        let version_dir = fx.settings.files_dir.join("linux/x86_64/ripgrep/14.1.0");
        fs::create_dir_all(&version_dir).unwrap();
        write_tar_gz(
            &version_dir.join("ripgrep.tar.gz"),
            &[
                ("ripgrep-14.1.0/complete/_rg", b"#compdef rg\n"),
                ("ripgrep-linux-x86_64/rg.fish", b"complete -c rg\n"),
            ],
        );

        let manifest = completions(
            r#"
completions:
  - name: ripgrep
    zsh:
      method: archive
      archive_path: "{name}-{version}/complete/_rg"
      output: _rg
    fish:
      method: archive
      archive_path: "{name}-{os}-{arch}/rg.fish"
      output: rg.fish
"#,
        );

        let mut ctx = new_ctx(&fx);
        let summary = harvester(&fx).run(&manifest, &mut ctx).await;

        assert_eq!(summary.written, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(
            fs::read(fx.settings.completions_dir.join("zsh/_rg")).unwrap(),
            b"#compdef rg\n"
        );
        assert_eq!(
            fs::read(fx.settings.completions_dir.join("fish/rg.fish")).unwrap(),
            b"complete -c rg\n"
        );
    }

    #[tokio::test]
    async fn test_archive_path_unknown_placeholder_fails() {
        let fx = fixture();
        let version_dir = fx.settings.files_dir.join("linux/x86_64/ripgrep/14.1.0");
        fs::create_dir_all(&version_dir).unwrap();
        write_tar_gz(&version_dir.join("ripgrep.tar.gz"), &[("_rg", b"#compdef rg\n")]);

        let manifest = completions(
            r#"
completions:
  - name: ripgrep
    zsh:
      method: archive
      archive_path: "{release}/_rg"
      output: _rg
"#,
        );

        let mut ctx = new_ctx(&fx);
        let summary = harvester(&fx).run(&manifest, &mut ctx).await;

        assert_eq!(summary.failed, 1);
        assert!(!fx.settings.completions_dir.join("zsh/_rg").exists());
    }

    #[tokio::test]
    async fn test_archive_found_under_glob_metacharacters() {
        let fx = fixture_at("roles[old]/terminal_setup*");
        let version_dir = fx.settings.files_dir.join("linux/x86_64/ripgrep/14.1.0");
        fs::create_dir_all(&version_dir).unwrap();
        write_tar_gz(
            &version_dir.join("ripgrep.tar.gz"),
            &[("ripgrep-14.1.0/complete/_rg", b"#compdef rg\n")],
        );

        let manifest = completions(
            r#"
completions:
  - name: ripgrep
    zsh:
      method: archive
      archive_path: "ripgrep-{version}/complete/_rg"
      output: _rg
"#,
        );

        let mut ctx = new_ctx(&fx);
        let summary = harvester(&fx).run(&manifest, &mut ctx).await;

        assert_eq!(summary.written, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(
            fs::read(fx.settings.completions_dir.join("zsh/_rg")).unwrap(),
            b"#compdef rg\n"
        );
    }

    #[tokio::test]
    async fn test_plugin_and_none_methods_are_skipped() {
        let fx = fixture();
        let manifest = completions(
            r#"
completions:
  - name: zoxide
    fish:
      method: plugin
    zsh:
      method: none
"#,
        );

        let mut ctx = new_ctx(&fx);
        let summary = harvester(&fx).run(&manifest, &mut ctx).await;

        assert_eq!(summary, HarvestSummary { skipped: 2, ..Default::default() });
        assert!(!ctx.changed());
        assert!(!fx.settings.completions_dir.exists());
    }

    #[tokio::test]
    async fn test_archive_method_without_archive_fails_alone() {
        let fx = fixture();
        fx.transport.serve("https://example.com/zoxide.fish", "complete -c zoxide\n");
        let manifest = completions(
            r#"
completions:
  - name: zoxide
    version: "0.9.5"
    zsh:
      method: archive
      archive_path: completions/_zoxide
      output: _zoxide
    fish:
      method: url
      url: "https://example.com/zoxide.fish"
      output: zoxide.fish
"#,
        );

        let mut ctx = new_ctx(&fx);
        let summary = harvester(&fx).run(&manifest, &mut ctx).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.written, 1);
        assert!(fx.settings.completions_dir.join("fish/zoxide.fish").is_file());
    }

    #[tokio::test]
    async fn test_output_outside_shell_dir_is_rejected() {
        let fx = fixture();
        fx.transport.serve("https://example.com/x", "x");
        let manifest = completions(
            r#"
completions:
  - name: zoxide
    zsh:
      method: url
      url: "https://example.com/x"
      output: ../../escaped
"#,
        );

        let mut ctx = new_ctx(&fx);
        let summary = harvester(&fx).run(&manifest, &mut ctx).await;

        assert_eq!(summary.failed, 1);
        assert!(!fx.temp_dir.path().join("role/files/escaped").exists());
        assert!(fx.transport.requests().is_empty());
    }
}
