//! Binstage - stages tool binaries and shell completions for a role.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use binstage_core::{
    load_completions_manifest, load_tool_manifest, ChecksumCache, CompletionHarvester,
    HttpTransport, RunContext, Settings, ToolProvisioner, Transport, DEFAULT_TOOLS_KEY,
};

/// Line printed on stdout when anything was staged, rewritten or cached.
const CHANGED_SIGNAL: &str = "CHANGED: Binaries were downloaded or checksums updated.";

#[derive(Parser)]
#[command(name = "binstage")]
#[command(author, version, about = "Stage verified tool binaries and shell completions for a role")]
struct Cli {
    /// Role directory containing defaults/main.yml
    role_path: PathBuf,

    /// Manifest key holding the tools list (falls back to <KEY>_defaults)
    #[arg(long, value_name = "KEY", default_value = DEFAULT_TOOLS_KEY)]
    tools_key: String,

    /// Only stage binaries
    #[arg(long)]
    skip_completions: bool,

    /// Scratch directory for downloads and extraction
    #[arg(long, value_name = "DIR")]
    scratch_dir: Option<PathBuf>,

    /// Seconds before a completion command is killed
    #[arg(long, value_name = "SECS", default_value_t = binstage_core::config::DEFAULT_COMMAND_TIMEOUT_SECS)]
    command_timeout: u64,

    /// Per-request HTTP timeout in seconds (no timeout by default)
    #[arg(long, value_name = "SECS")]
    http_timeout: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::for_role(&self.role_path)
            .with_context(|| format!("invalid role path {}", self.role_path.display()))?
            .with_tools_key(&self.tools_key);

        if let Some(dir) = &self.scratch_dir {
            settings = settings.with_scratch_dir(dir);
        }
        settings.command_timeout = Duration::from_secs(self.command_timeout);
        settings.http_timeout = self.http_timeout.map(Duration::from_secs);
        settings.skip_completions = self.skip_completions;
        Ok(settings)
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("binstage={level},binstage_core={level},warn"))
    });

    // stdout is reserved for the change signal.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    tracing::info!("Starting binstage v{}", binstage_core::VERSION);

    match run(&cli).await {
        Ok(changed) => {
            if changed {
                println!("{}", CHANGED_SIGNAL);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<bool> {
    let transport = HttpTransport::new(cli.http_timeout.map(Duration::from_secs))
        .context("failed to create HTTP client")?;
    run_with(cli, Arc::new(transport)).await
}

/// Runs provisioning then harvesting. Returns whether anything changed.
async fn run_with(cli: &Cli, transport: Arc<dyn Transport>) -> Result<bool> {
    let settings = cli.settings()?;
    settings
        .ensure_dirs_exist()
        .context("failed to prepare working directories")?;

    let manifest = load_tool_manifest(&settings).context("failed to load tool manifest")?;
    tracing::info!(
        "Loaded {} tools from {}",
        manifest.tools.len(),
        settings.defaults_file.display()
    );

    let cache = ChecksumCache::load(&settings.checksums_file)
        .context("failed to read checksum cache")?;
    let mut ctx = RunContext::new(cache);

    ToolProvisioner::new(&settings, transport.clone())
        .run(&manifest, &mut ctx)
        .await;

    if settings.skip_completions {
        tracing::info!("Skipping completions");
    } else {
        match load_completions_manifest(&settings.completions_manifest) {
            Ok(Some(completions)) => {
                CompletionHarvester::new(&settings, &manifest, transport)
                    .run(&completions, &mut ctx)
                    .await;
            }
            Ok(None) => {}
            Err(e) => tracing::error!("Skipping completions: {}", e),
        }
    }

    if ctx
        .cache_mut()
        .save_if_dirty()
        .context("failed to write checksum cache")?
    {
        ctx.mark_changed();
    }

    Ok(ctx.changed())
}
