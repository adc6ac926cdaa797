//! Domain types shared by every devflow crate.
//!
//! Filesystem locations use `PathBuf`. Paths *inside* a repository (as
//! reported by the VCS) are repo-relative `String`s with forward slashes,
//! because that is the form the VCS hands back and the form persisted in
//! `snapshot-meta.json`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A commit identifier (full SHA for git).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(pub String);

impl CommitId {
    /// Abbreviated form used in commit messages and branch names.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(7)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CommitId {
    fn from(s: String) -> Self {
        Self(s.trim().to_owned())
    }
}

impl From<&str> for CommitId {
    fn from(s: &str) -> Self {
        Self(s.trim().to_owned())
    }
}

// ---------------------------------------------------------------------------
// Change set
// ---------------------------------------------------------------------------

/// One path-level difference between two commits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Change {
    Added { path: String },
    Modified { path: String },
    Deleted { path: String },
    Renamed { old_path: String, new_path: String },
}

impl Change {
    pub fn added(path: impl Into<String>) -> Self {
        Change::Added { path: path.into() }
    }

    pub fn modified(path: impl Into<String>) -> Self {
        Change::Modified { path: path.into() }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Change::Deleted { path: path.into() }
    }

    pub fn renamed(old_path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Change::Renamed {
            old_path: old_path.into(),
            new_path: new_path.into(),
        }
    }

    /// The path this change leaves behind at `head` (the new path for renames,
    /// the removed path for deletions).
    pub fn path(&self) -> &str {
        match self {
            Change::Added { path } | Change::Modified { path } | Change::Deleted { path } => path,
            Change::Renamed { new_path, .. } => new_path,
        }
    }

    /// The pre-rename path, if this is a rename.
    pub fn old_path(&self) -> Option<&str> {
        match self {
            Change::Renamed { old_path, .. } => Some(old_path),
            _ => None,
        }
    }

    /// Every path affected by this change, old path first for renames.
    pub fn touched_paths(&self) -> Vec<&str> {
        match self {
            Change::Renamed { old_path, new_path } => vec![old_path, new_path],
            other => vec![other.path()],
        }
    }

    /// Single-letter status, matching `git diff --name-status`.
    pub fn status_code(&self) -> char {
        match self {
            Change::Added { .. } => 'A',
            Change::Modified { .. } => 'M',
            Change::Deleted { .. } => 'D',
            Change::Renamed { .. } => 'R',
        }
    }

    /// True when the file exists at `head` after this change.
    pub fn exists_at_head(&self) -> bool {
        !matches!(self, Change::Deleted { .. })
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::Renamed { old_path, new_path } => write!(f, "R\t{old_path} -> {new_path}"),
            other => write!(f, "{}\t{}", other.status_code(), other.path()),
        }
    }
}

/// Ordered, de-duplicated list of every path touched by `changes`.
///
/// Order follows the change set; a rename contributes its old path, then its
/// new path.
pub fn changed_paths(changes: &[Change]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for change in changes {
        for path in change.touched_paths() {
            if !path.is_empty() && seen.insert(path) {
                out.push(path.to_owned());
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Snapshot metadata
// ---------------------------------------------------------------------------

/// Provenance of the last successful sync, persisted as `snapshot-meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub last_synced_sha: String,
    pub changed_files: Vec<String>,
    #[serde(with = "rfc3339_secs")]
    pub created_at: DateTime<Utc>,
}

impl SnapshotMeta {
    pub fn new(commit: &CommitId, changes: &[Change], created_at: DateTime<Utc>) -> Self {
        Self {
            last_synced_sha: commit.0.clone(),
            changed_files: changed_paths(changes),
            created_at,
        }
    }
}

/// RFC 3339 timestamps with whole-second precision and a `Z` suffix.
pub mod rfc3339_secs {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Checkout
// ---------------------------------------------------------------------------

/// A local working copy bound to a remote. Owned by the caller; the sync
/// engine never creates or deletes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryCheckout {
    /// Absolute path to the working copy root.
    pub path: PathBuf,
    /// Remote URL, when known. Only used for display.
    pub remote_url: Option<String>,
}

impl RepositoryCheckout {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            remote_url: None,
        }
    }

    pub fn with_remote(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Human-readable repository name: `owner/repo` from the remote URL when
    /// available, otherwise the checkout directory name.
    pub fn display_name(&self) -> String {
        if let Some(url) = &self.remote_url {
            let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
            let mut parts = trimmed.rsplit(&['/', ':'][..]);
            if let (Some(repo), Some(owner)) = (parts.next(), parts.next()) {
                if !repo.is_empty() && !owner.is_empty() {
                    return format!("{owner}/{repo}");
                }
            }
        }
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

// ---------------------------------------------------------------------------
// Publish policy
// ---------------------------------------------------------------------------

/// How updated artifacts are integrated back into the tracked branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublishPolicy {
    /// Rebase onto the remote default branch and fast-forward push to it.
    #[default]
    Direct,
    /// Push a dedicated branch and hand off to a review-request collaborator.
    Review,
}

impl fmt::Display for PublishPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishPolicy::Direct => write!(f, "direct"),
            PublishPolicy::Review => write!(f, "review"),
        }
    }
}

impl FromStr for PublishPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(PublishPolicy::Direct),
            "review" | "pr" => Ok(PublishPolicy::Review),
            other => Err(format!(
                "unknown publish policy '{other}'; expected: direct, review"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
