//! `devflow sync <checkout>`: one full sync, or a dry-run preview.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use devflow_core::PublishPolicy;
use devflow_sync::{pipeline, PublishOutcome, SyncOptions, SyncReport, WriteResult};

/// Arguments for `devflow sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Path to the repository checkout.
    pub checkout: PathBuf,

    /// How to publish: `direct` pushes to the default branch, `review`
    /// pushes a branch for review. Defaults to the configured policy.
    #[arg(long, value_name = "POLICY")]
    pub policy: Option<PublishPolicy>,

    /// Build and show unified diffs of what would change; write nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Abort the sync (and any running git command) after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl SyncArgs {
    pub fn run(self, config_path: Option<&Path>) -> Result<()> {
        let config = crate::load_config(config_path)?;
        let root = crate::resolve_checkout(&self.checkout)?;
        let policy = self.policy.unwrap_or(config.publish.policy);
        let options = SyncOptions {
            deadline: self.timeout.map(|secs| Instant::now() + Duration::from_secs(secs)),
            dry_run: self.dry_run,
        };

        tracing::info!(policy = %policy, dry_run = self.dry_run, timeout = ?self.timeout, "starting sync");
        let report = pipeline::run_sync(&config, &root, policy, options, None)
            .with_context(|| format!("sync failed for '{}'", root.display()))?;

        if self.dry_run {
            print_previews(&report);
        } else {
            print_report(&root, &report);
        }
        Ok(())
    }
}

fn print_previews(report: &SyncReport) {
    println!(
        "[dry-run] {} change(s) up to {}{}",
        report.plan.changes.len(),
        report.plan.head.short(),
        if report.plan.full_rebuild() { " (full rebuild)" } else { "" }
    );
    if report.previews.is_empty() {
        println!("[dry-run] knowledge base already up to date");
        return;
    }
    for diff in &report.previews {
        print!("{}", diff.unified_diff);
        if !diff.unified_diff.ends_with('\n') {
            println!();
        }
    }
}

fn print_report(root: &Path, report: &SyncReport) {
    let mode = if report.plan.full_rebuild() { "full rebuild" } else { "incremental" };
    println!(
        "{} '{}' at {} ({} change(s), {mode})",
        "✓".green().bold(),
        root.display(),
        report.plan.head.short(),
        report.plan.changes.len(),
    );

    for result in &report.written {
        match result {
            WriteResult::Written { path } => println!("  ✎  {}", path.display()),
            WriteResult::Unchanged { path } => println!("  ·  {}", path.display()),
            WriteResult::Removed { path } => println!("  ✗  {}", path.display()),
        }
    }
    if !report.pointer_advanced() {
        println!("  pointer unchanged");
    }

    match &report.publish {
        Some(PublishOutcome::Pushed { commit, branch }) => {
            println!("  pushed {} to {branch}", commit.short())
        }
        Some(PublishOutcome::ReviewRequested { branch, request, .. }) => {
            println!("  pushed {branch} for review ({request})")
        }
        Some(PublishOutcome::Noop) | None => println!("  nothing to publish"),
    }
}
