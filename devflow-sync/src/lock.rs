//! Single-writer lock for one checkout.
//!
//! ## Lock file format
//! Path: `<lock-dir>/snapshot.write.lock`. Created with `create_new`, so
//! existence alone means "locked". Contents are JSON [`LockInfo`] for
//! diagnostics; an empty or unreadable file still counts as held.
//!
//! Each acquisition writes a fresh `token`. A held [`WriterLock`] removes the
//! marker on `release()` or on drop only while the marker still carries that
//! token, so a sync whose lock was reclaimed or force-removed never deletes
//! the lock of the sync that replaced it.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use devflow_core::types::rfc3339_secs;

use crate::error::{io_err, SyncError};

// ---------------------------------------------------------------------------
// LockInfo
// ---------------------------------------------------------------------------

/// Who holds the lock, and since when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    #[serde(with = "rfc3339_secs")]
    pub acquired_at: DateTime<Utc>,
    pub checkout: PathBuf,
    /// Unique per acquisition. Empty in markers written by hand.
    #[serde(default)]
    pub token: String,
}

impl LockInfo {
    pub fn current(checkout: &Path) -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now(),
            checkout: checkout.to_path_buf(),
            token: Uuid::new_v4().to_string(),
        }
    }

    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.acquired_at)
            .to_std()
            .unwrap_or_default()
    }

    /// e.g. `pid 4242, acquired 3m 12s ago`
    pub fn display_summary(&self) -> String {
        format!("pid {}, acquired {} ago", self.pid, format_age(self.age()))
    }
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_summary())
    }
}

pub fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

/// What an existing marker says about its holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    /// `None` when the marker is empty or not valid JSON.
    pub info: Option<LockInfo>,
    /// From `acquired_at`, or the marker's mtime when unreadable.
    pub age: Option<Duration>,
}

// ---------------------------------------------------------------------------
// WriterLock
// ---------------------------------------------------------------------------

/// A held writer lock. Released on drop.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
    token: String,
    released: bool,
}

impl WriterLock {
    /// Try once to take the lock at `lock_path`. Never blocks.
    ///
    /// With `max_age` set, a marker older than the limit is reclaimed (with a
    /// warning) and acquisition is retried exactly once.
    pub fn acquire(lock_path: &Path, checkout: &Path, max_age: Option<Duration>) -> Result<Self, SyncError> {
        if let Some(dir) = lock_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let info = LockInfo::current(checkout);

        if Self::create(lock_path, &info)? {
            return Ok(Self::held(lock_path, info.token));
        }

        let holder = inspect(lock_path)?;
        let stale = match (max_age, holder.as_ref().and_then(|h| h.age)) {
            (Some(limit), Some(age)) => age > limit,
            _ => false,
        };
        if stale {
            tracing::warn!(
                path = %lock_path.display(),
                holder = ?holder.as_ref().and_then(|h| h.info.as_ref()).map(LockInfo::display_summary),
                "reclaiming stale writer lock"
            );
            force_release(lock_path)?;
            if Self::create(lock_path, &info)? {
                return Ok(Self::held(lock_path, info.token));
            }
        }

        Err(SyncError::LockBusy {
            path: lock_path.to_path_buf(),
            holder: holder.and_then(|h| h.info),
        })
    }

    fn held(path: &Path, token: String) -> Self {
        tracing::debug!(path = %path.display(), "writer lock acquired");
        Self {
            path: path.to_path_buf(),
            token,
            released: false,
        }
    }

    /// `Ok(false)` when the marker already exists.
    fn create(path: &Path, info: &LockInfo) -> Result<bool, SyncError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(io_err(path, e)),
        };
        let json = serde_json::to_vec(info)?;
        if let Err(e) = file.write_all(&json).and_then(|_| file.sync_all()) {
            drop(file);
            let _ = std::fs::remove_file(path);
            return Err(io_err(path, e));
        }
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the marker now, surfacing any I/O error.
    pub fn release(mut self) -> Result<(), SyncError> {
        self.released = true;
        self.remove_if_owned()
    }

    /// Delete the marker unless another acquisition has replaced it.
    fn remove_if_owned(&self) -> Result<(), SyncError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "writer lock was removed while held");
                return Ok(());
            }
            Err(e) => return Err(io_err(&self.path, e)),
        };
        let owner = serde_json::from_slice::<LockInfo>(&bytes).ok().map(|info| info.token);
        if owner.as_deref() != Some(self.token.as_str()) {
            tracing::warn!(path = %self.path.display(), "writer lock was taken over; leaving it in place");
            return Ok(());
        }
        remove_marker(&self.path)?;
        tracing::debug!(path = %self.path.display(), "writer lock released");
        Ok(())
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.remove_if_owned() {
            tracing::warn!(error = %e, "failed to release writer lock");
        }
    }
}

fn remove_marker(path: &Path) -> Result<(), SyncError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}

// ---------------------------------------------------------------------------
// Operator helpers
// ---------------------------------------------------------------------------

/// Describe the current holder, or `None` when unlocked.
pub fn inspect(lock_path: &Path) -> Result<Option<LockHolder>, SyncError> {
    let bytes = match std::fs::read(lock_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(lock_path, e)),
    };
    let info: Option<LockInfo> = serde_json::from_slice(&bytes).ok();
    let age = match &info {
        Some(info) => Some(info.age()),
        None => std::fs::metadata(lock_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok()),
    };
    Ok(Some(LockHolder { info, age }))
}

/// Remove the marker regardless of holder. Returns whether one existed.
pub fn force_release(lock_path: &Path) -> Result<bool, SyncError> {
    let existed = lock_path.exists();
    remove_marker(lock_path)?;
    Ok(existed)
}
