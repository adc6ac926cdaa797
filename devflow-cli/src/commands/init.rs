//! `devflow init-config [--force]`

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;

use devflow_core::{config, SyncConfig};

/// Arguments for `devflow init-config`.
#[derive(Args, Debug)]
pub struct InitConfigArgs {
    /// Overwrite an existing config file.
    #[arg(long)]
    pub force: bool,
}

impl InitConfigArgs {
    pub fn run(self, config_path: Option<&Path>) -> Result<()> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => config::config_path_at(&dirs::home_dir().context("could not determine home directory")?),
        };
        if path.exists() && !self.force {
            bail!("'{}' already exists; pass --force to overwrite", path.display());
        }

        config::save_to(&path, &SyncConfig::default())
            .with_context(|| format!("failed to write '{}'", path.display()))?;
        println!("✓ Wrote default config to {}", path.display());
        Ok(())
    }
}
