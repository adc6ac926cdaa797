//! devflow: keep a repository's knowledge base in step with its history.
//!
//! # Usage
//!
//! ```text
//! devflow sync <checkout> [--policy direct|review] [--dry-run] [--timeout SECS]
//! devflow changes <checkout>
//! devflow status <checkout> [--json]
//! devflow unlock <checkout>
//! devflow init-config [--force]
//! ```
//!
//! Every command accepts `--config <PATH>` (default `~/.devflow/config.yaml`)
//! and `--verbose`.

mod commands;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{
    changes::ChangesArgs, init::InitConfigArgs, status::StatusArgs, sync::SyncArgs, unlock::UnlockArgs,
};
use devflow_core::{config, SyncConfig};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "devflow",
    version,
    about = "Incrementally sync a repository's knowledge base with its remote branch",
    long_about = None,
)]
struct Cli {
    /// Config file to use instead of ~/.devflow/config.yaml.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG overrides).
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync the knowledge base of a checkout and publish it.
    Sync(SyncArgs),

    /// Show the change set since the last sync without building anything.
    Changes(ChangesArgs),

    /// Classify the knowledge base of a checkout.
    Status(StatusArgs),

    /// Remove a leftover writer lock.
    Unlock(UnlockArgs),

    /// Write the default configuration file.
    InitConfig(InitConfigArgs),
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// `--config` when given, otherwise the per-user file (defaults if absent).
pub(crate) fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let config = match path {
        Some(path) => {
            config::load_from(path).with_context(|| format!("failed to load config '{}'", path.display()))?
        }
        None => config::load().context("failed to load ~/.devflow/config.yaml")?,
    };
    tracing::debug!(
        path = ?path,
        remote = %config.remote,
        branch = %config.default_branch,
        "config loaded"
    );
    Ok(config)
}

/// Canonical checkout root, so lock metadata and logs carry a stable path.
pub(crate) fn resolve_checkout(path: &Path) -> Result<PathBuf> {
    let root = path
        .canonicalize()
        .with_context(|| format!("cannot resolve checkout '{}'", path.display()))?;
    tracing::debug!(checkout = %root.display(), "checkout resolved");
    Ok(root)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Sync(args) => args.run(config_path),
        Commands::Changes(args) => args.run(config_path),
        Commands::Status(args) => args.run(config_path),
        Commands::Unlock(args) => args.run(config_path),
        Commands::InitConfig(args) => args.run(config_path),
    }
}
