//! `devflow status <checkout>`: knowledge-base freshness, without fetching.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use devflow_sync::{lock::format_age, pipeline, KnowledgeBaseStatus};

/// Arguments for `devflow status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Path to the repository checkout.
    pub checkout: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusJson<'a> {
    checkout: String,
    #[serde(flatten)]
    status: &'a KnowledgeBaseStatus,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "checkout")]
    checkout: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "detail")]
    detail: String,
}

impl StatusArgs {
    pub fn run(self, config_path: Option<&Path>) -> Result<()> {
        let config = crate::load_config(config_path)?;
        let root = crate::resolve_checkout(&self.checkout)?;
        let status = pipeline::status(&config, &root)
            .with_context(|| format!("status check failed for '{}'", root.display()))?;

        if self.json {
            let payload = StatusJson {
                checkout: root.display().to_string(),
                status: &status,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        let row = StatusRow {
            checkout: root.display().to_string(),
            status: format!("{} {}", indicator(&status), status.label().to_uppercase()),
            detail: detail(&status),
        };
        let mut table = Table::new(vec![row]);
        table.with(Style::rounded());
        println!("{table}");
        if matches!(
            status,
            KnowledgeBaseStatus::NeverSynced
                | KnowledgeBaseStatus::Behind { .. }
                | KnowledgeBaseStatus::PendingPublish { .. }
        ) {
            println!("Run 'devflow sync {}' to update.", self.checkout.display());
        }
        Ok(())
    }
}

fn indicator(status: &KnowledgeBaseStatus) -> String {
    match status {
        KnowledgeBaseStatus::NeverSynced => "■".bright_black().bold().to_string(),
        KnowledgeBaseStatus::Current { .. } => "■".green().bold().to_string(),
        KnowledgeBaseStatus::Behind { .. } => "■".yellow().bold().to_string(),
        KnowledgeBaseStatus::Modified { .. } => "■".red().bold().to_string(),
        KnowledgeBaseStatus::PendingPublish { .. } => "■".magenta().bold().to_string(),
        KnowledgeBaseStatus::Locked { .. } => "■".blue().bold().to_string(),
    }
}

fn detail(status: &KnowledgeBaseStatus) -> String {
    match status {
        KnowledgeBaseStatus::NeverSynced => "no commit pointer".to_string(),
        KnowledgeBaseStatus::Current { pointer } => format!("at {}", pointer.short()),
        KnowledgeBaseStatus::Behind { pointer, head } => {
            format!("{} → {}", pointer.short(), head.short())
        }
        KnowledgeBaseStatus::Modified { files } => {
            let names: Vec<String> = files
                .iter()
                .map(|f| f.file_name().map_or_else(|| f.display().to_string(), |n| n.to_string_lossy().into_owned()))
                .collect();
            format!("edited by hand: {}", names.join(", "))
        }
        KnowledgeBaseStatus::PendingPublish { commit } => {
            format!("publish of {} never confirmed", commit.short())
        }
        KnowledgeBaseStatus::Locked { pid, age_secs } => {
            let pid = pid.map_or_else(|| "unknown pid".to_string(), |p| format!("pid {p}"));
            match age_secs {
                Some(secs) => format!("{pid}, held {}", format_age(std::time::Duration::from_secs(*secs))),
                None => pid,
            }
        }
    }
}
