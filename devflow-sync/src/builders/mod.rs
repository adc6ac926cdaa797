//! Built-in builders.
//!
//! | Builder            | Artifacts                                  |
//! |--------------------|--------------------------------------------|
//! | `structure`        | `repo-structure.md`, `file-metadata.json`  |
//! | `dependency-graph` | `dependency-graph.json`                    |
//! | `readme`           | `README.md`                                |
//!
//! The per-file builders keep a map keyed by path, patch it with the change
//! set, and re-render. A missing or unreadable previous artifact falls back
//! to the full file listing, so the result never depends on which path was
//! taken.

mod dependency_graph;
mod readme;
mod structure;

pub use dependency_graph::{DependencyGraph, DependencyGraphBuilder, DependencyNode};
pub use readme::ReadmeBuilder;
pub use structure::StructureBuilder;

use std::borrow::Cow;
use std::collections::BTreeMap;

use devflow_core::Change;
use devflow_detector::is_ignored;

use crate::builder::{BuildContext, BuildError, SourceTree};
use crate::error::SyncError;

/// The map to patch and the changes to patch it with.
///
/// Incremental runs start from the previous artifact. When it is missing or
/// unparsable the map starts empty and every file at `head` is treated as
/// added.
pub(crate) fn starting_point<'c, T>(
    ctx: &BuildContext<'_>,
    builder: &str,
    artifact: &str,
    changes: &'c [Change],
    parse: impl FnOnce(&[u8]) -> Result<BTreeMap<String, T>, serde_json::Error>,
) -> Result<(BTreeMap<String, T>, Cow<'c, [Change]>), BuildError> {
    if ctx.full_rebuild {
        return Ok((BTreeMap::new(), Cow::Borrowed(changes)));
    }
    let previous = match ctx.previous(artifact)? {
        Some(bytes) => match parse(&bytes) {
            Ok(entries) => Some(entries),
            Err(e) => {
                tracing::warn!(builder, artifact, error = %e, "previous artifact unreadable; rebuilding");
                None
            }
        },
        None => {
            tracing::warn!(builder, artifact, "previous artifact missing; rebuilding");
            None
        }
    };
    match previous {
        Some(entries) => Ok((entries, Cow::Borrowed(changes))),
        None => {
            let all = ctx.source.files()?.into_iter().map(Change::added).collect();
            Ok((BTreeMap::new(), Cow::Owned(all)))
        }
    }
}

/// Apply `changes` to `entries`, re-describing every path that exists at
/// `head`. Ignored paths and paths `describe` rejects are dropped.
pub(crate) fn patch_entries<T>(
    entries: &mut BTreeMap<String, T>,
    changes: &[Change],
    source: &SourceTree<'_>,
    mut describe: impl FnMut(&str, &[u8]) -> Option<T>,
) -> Result<(), SyncError> {
    for change in changes {
        if let Some(old) = change.old_path() {
            entries.remove(old);
        }
        let path = change.path();
        if !change.exists_at_head() || is_ignored(path) {
            entries.remove(path);
            continue;
        }
        let bytes = source.read(path)?;
        match describe(path, &bytes) {
            Some(entry) => {
                entries.insert(path.to_owned(), entry);
            }
            None => {
                entries.remove(path);
            }
        }
    }
    Ok(())
}

/// Pretty JSON with a trailing newline.
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    Ok(json)
}
