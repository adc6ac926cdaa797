//! Dry-run unified diffs: staged artifacts vs the current subtree.

use std::io::ErrorKind;
use std::path::Path;

use similar::TextDiff;

use crate::error::{io_err, SyncError};
use crate::writer::Staging;

/// A single artifact diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    /// Artifact name relative to the subtree.
    pub file: String,
    pub unified_diff: String,
}

/// Compare every staged artifact with its counterpart under `kb_dir`.
/// Identical files are omitted. Nothing is written.
pub fn preview_staging(staging: &Staging, kb_dir: &Path, kb_label: &str) -> Result<Vec<FileDiff>, SyncError> {
    let mut diffs = Vec::new();
    for name in staging.files()? {
        let staged_path = staging.path().join(&name);
        let staged = std::fs::read_to_string(&staged_path).map_err(|e| io_err(&staged_path, e))?;
        let existing = read_existing_or_empty(&kb_dir.join(&name))?;
        if existing == staged {
            continue;
        }
        let old_header = format!("a/{kb_label}/{name}");
        let new_header = format!("b/{kb_label}/{name}");
        let unified = TextDiff::from_lines(&existing, &staged)
            .unified_diff()
            .header(&old_header, &new_header)
            .context_radius(3)
            .to_string();
        diffs.push(FileDiff {
            file: name,
            unified_diff: unified,
        });
    }
    Ok(diffs)
}

fn read_existing_or_empty(path: &Path) -> Result<String, SyncError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(io_err(path, err)),
    }
}
