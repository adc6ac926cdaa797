//! `devflow changes <checkout>`: the change set a sync would process.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use devflow_sync::pipeline;

/// Arguments for `devflow changes`.
#[derive(Args, Debug)]
pub struct ChangesArgs {
    /// Path to the repository checkout.
    pub checkout: PathBuf,
}

impl ChangesArgs {
    pub fn run(self, config_path: Option<&Path>) -> Result<()> {
        let config = crate::load_config(config_path)?;
        let root = crate::resolve_checkout(&self.checkout)?;
        let plan = pipeline::preview_changes(&config, &root)
            .with_context(|| format!("cannot compute changes for '{}'", root.display()))?;

        let base = plan.base.as_ref().map_or("(none)", |b| b.short());
        println!("{base}..{}", plan.head.short());
        if plan.full_rebuild() {
            println!("full rebuild: every file at head is listed");
        }
        if plan.changes.is_empty() {
            println!("No changes since the last sync.");
            return Ok(());
        }
        for change in &plan.changes {
            println!("{change}");
        }
        Ok(())
    }
}
