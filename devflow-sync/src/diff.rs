//! Change-set computation.
//!
//! `git diff --name-status -z` output is parsed into [`Change`]s, then paths
//! inside the reserved subtrees (the knowledge base and the lock directory)
//! are removed so the knowledge base never describes itself.

use std::collections::HashSet;

use devflow_core::{Change, CommitId};

use crate::error::SyncError;
use crate::vcs::Vcs;

// ---------------------------------------------------------------------------
// Name-status parsing
// ---------------------------------------------------------------------------

/// Parse NUL-separated name-status output.
///
/// | Status          | Change                      |
/// |-----------------|-----------------------------|
/// | `A`             | `Added`                     |
/// | `M`, `T`, `U`   | `Modified`                  |
/// | `D`             | `Deleted`                   |
/// | `R<score>`      | `Renamed { old, new }`      |
/// | `C<score>`      | `Added` (the copy)          |
/// | anything else   | `Modified` (last path)      |
pub fn parse_name_status_z(raw: &[u8]) -> Result<Vec<Change>, String> {
    let mut fields = raw
        .split(|&b| b == 0)
        .map(|f| String::from_utf8_lossy(f).into_owned());
    let mut changes = Vec::new();

    while let Some(status) = fields.next() {
        if status.is_empty() {
            continue;
        }
        let mut path = || {
            fields
                .next()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| format!("status `{status}` is missing a path"))
        };
        let change = match status.chars().next() {
            Some('A') => Change::added(path()?),
            Some('M') | Some('T') | Some('U') => Change::modified(path()?),
            Some('D') => Change::deleted(path()?),
            Some('R') => {
                let old = path()?;
                Change::renamed(old, path()?)
            }
            Some('C') => {
                let _source = path()?;
                Change::added(path()?)
            }
            _ => Change::modified(path()?),
        };
        changes.push(change);
    }
    Ok(changes)
}

// ---------------------------------------------------------------------------
// Reserved-path filtering
// ---------------------------------------------------------------------------

/// True when `path` lies under one of `reserved` (each ending in `/`).
pub fn is_reserved(path: &str, reserved: &[String]) -> bool {
    reserved
        .iter()
        .any(|prefix| path.starts_with(prefix.as_str()) || path == prefix.trim_end_matches('/'))
}

/// Drop reserved paths and collapse duplicate paths, keeping the first.
///
/// A rename across the reserved boundary degrades to the side that is still
/// visible: out of the subtree becomes `Added`, into it becomes `Deleted`.
pub fn filter_changes(changes: Vec<Change>, reserved: &[String]) -> Vec<Change> {
    let mut seen = HashSet::new();
    changes
        .into_iter()
        .filter_map(|change| match change {
            Change::Renamed { old_path, new_path } => {
                match (is_reserved(&old_path, reserved), is_reserved(&new_path, reserved)) {
                    (false, false) => Some(Change::Renamed { old_path, new_path }),
                    (true, false) => Some(Change::Added { path: new_path }),
                    (false, true) => Some(Change::Deleted { path: old_path }),
                    (true, true) => None,
                }
            }
            other if is_reserved(other.path(), reserved) => None,
            other => Some(other),
        })
        .filter(|change| seen.insert(change.path().to_owned()))
        .collect()
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Computes change sets for one checkout.
pub struct DiffEngine<'a> {
    vcs: &'a dyn Vcs,
    reserved: &'a [String],
}

impl<'a> DiffEngine<'a> {
    pub fn new(vcs: &'a dyn Vcs, reserved: &'a [String]) -> Self {
        Self { vcs, reserved }
    }

    /// Changes from `base` to `head`. No base means a full enumeration: one
    /// `Added` per tracked file at `head`.
    pub fn diff(&self, base: Option<&CommitId>, head: &CommitId) -> Result<Vec<Change>, SyncError> {
        let raw = match base {
            Some(base) => self.vcs.diff_name_status(base, head)?,
            None => self
                .vcs
                .list_all_files(head)?
                .into_iter()
                .map(Change::added)
                .collect(),
        };
        Ok(filter_changes(raw, self.reserved))
    }

    /// Every non-reserved tracked file at `head`, sorted.
    pub fn files_at(&self, head: &CommitId) -> Result<Vec<String>, SyncError> {
        let mut files: Vec<String> = self
            .vcs
            .list_all_files(head)?
            .into_iter()
            .filter(|f| !is_reserved(f, self.reserved))
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }
}
