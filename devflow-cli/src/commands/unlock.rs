//! `devflow unlock <checkout>`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use devflow_sync::{lock::format_age, pipeline};

/// Arguments for `devflow unlock`.
#[derive(Args, Debug)]
pub struct UnlockArgs {
    /// Path to the repository checkout.
    pub checkout: PathBuf,
}

impl UnlockArgs {
    pub fn run(self, config_path: Option<&Path>) -> Result<()> {
        let config = crate::load_config(config_path)?;
        let root = crate::resolve_checkout(&self.checkout)?;
        let holder = pipeline::unlock(&config, &root)
            .with_context(|| format!("cannot unlock '{}'", root.display()))?;

        match holder {
            None => println!("No writer lock held for '{}'.", root.display()),
            Some(holder) => {
                tracing::debug!(pid = ?holder.info.as_ref().map(|i| i.pid), age = ?holder.age, "evicted lock holder");
                let who = match (&holder.info, holder.age) {
                    (Some(info), _) => info.display_summary(),
                    (None, Some(age)) => format!("unreadable marker, {} old", format_age(age)),
                    (None, None) => "unreadable marker".to_string(),
                };
                println!("✓ Removed writer lock ({who})");
            }
        }
        Ok(())
    }
}
