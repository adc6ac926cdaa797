//! Sync engine configuration.
//!
//! One [`SyncConfig`] value is built at startup and passed by reference to
//! everything that needs it. There is no process-wide configuration state.
//!
//! # Storage layout
//!
//! ```text
//! ~/.devflow/
//!   config.yaml        (optional; every field has a default)
//! ```
//!
//! # API pattern
//!
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::PublishPolicy;

/// Pointer file name inside the knowledge-base subtree.
pub const POINTER_FILE: &str = "commit-pointer";
/// Snapshot metadata file name inside the knowledge-base subtree.
pub const META_FILE: &str = "snapshot-meta.json";
/// Writer lock marker inside the lock directory.
pub const LOCK_FILE: &str = "snapshot.write.lock";
/// Unconfirmed-publish marker inside the lock directory.
pub const PENDING_PUBLISH_FILE: &str = "pending-publish.json";
/// Artifact hash manifest inside the lock directory.
pub const MANIFEST_FILE: &str = "artifact-hashes.json";
/// Builder staging area inside the lock directory.
pub const STAGING_DIR: &str = "staging";
/// Private git work tree used to publish, inside the lock directory.
pub const WORKTREE_DIR: &str = "publish-worktree";

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

/// Root configuration for one sync engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote name to fetch from and push to.
    pub remote: String,
    /// Tracked branch on the remote.
    pub default_branch: String,
    /// Reserved knowledge-base subtree, relative to the checkout root.
    pub knowledge_base_dir: PathBuf,
    /// Directory holding the lock marker and other local-only state.
    pub lock_dir: PathBuf,
    /// Disposable local branch used by the publisher.
    pub work_branch: String,
    pub publish: PublishConfig,
    pub locks: LockConfig,
    pub git: GitConfig,
    pub files: ArtifactFiles,
    /// Directory of `.tera` overrides for the knowledge-base templates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            default_branch: "main".to_string(),
            knowledge_base_dir: PathBuf::from(".devflow"),
            lock_dir: PathBuf::from(".devflow_locks"),
            work_branch: "_devflow_work".to_string(),
            publish: PublishConfig::default(),
            locks: LockConfig::default(),
            git: GitConfig::default(),
            files: ArtifactFiles::default(),
            template_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub policy: PublishPolicy,
    /// Prefix for review branches; the short head SHA is appended.
    pub review_branch_prefix: String,
    pub identity: CommitIdentity,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            policy: PublishPolicy::Direct,
            review_branch_prefix: "devflow/sync-".to_string(),
            identity: CommitIdentity::default(),
        }
    }
}

/// Author/committer identity used for knowledge-base commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        Self {
            name: "DevFlow Bot".to_string(),
            email: "devflow-bot@local".to_string(),
        }
    }
}

/// Writer lock policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LockConfig {
    /// Reclaim a lock older than this many seconds. `None` never reclaims.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,
}

impl LockConfig {
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Executable to invoke.
    pub binary: String,
    /// Upper bound for any single git invocation.
    pub command_timeout_secs: u64,
    /// Rename detection threshold in percent (`git diff -M<n>%`).
    pub rename_similarity: u8,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: "git".to_string(),
            command_timeout_secs: 120,
            rename_similarity: 50,
        }
    }
}

impl GitConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// File names of the builder-owned artifacts inside the subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactFiles {
    pub structure: String,
    pub file_metadata: String,
    pub dependency_graph: String,
    pub readme: String,
    pub analysis: String,
}

impl Default for ArtifactFiles {
    fn default() -> Self {
        Self {
            structure: "repo-structure.md".to_string(),
            file_metadata: "file-metadata.json".to_string(),
            dependency_graph: "dependency-graph.json".to_string(),
            readme: "README.md".to_string(),
            analysis: "repo-analysis.md".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

impl SyncConfig {
    /// `<checkout>/<knowledge_base_dir>`
    pub fn knowledge_base_path(&self, checkout: &Path) -> PathBuf {
        checkout.join(&self.knowledge_base_dir)
    }

    /// `<checkout>/<lock_dir>`
    pub fn lock_dir_path(&self, checkout: &Path) -> PathBuf {
        checkout.join(&self.lock_dir)
    }

    pub fn lock_file_path(&self, checkout: &Path) -> PathBuf {
        self.lock_dir_path(checkout).join(LOCK_FILE)
    }

    pub fn pointer_path(&self, checkout: &Path) -> PathBuf {
        self.knowledge_base_path(checkout).join(POINTER_FILE)
    }

    pub fn meta_path(&self, checkout: &Path) -> PathBuf {
        self.knowledge_base_path(checkout).join(META_FILE)
    }

    pub fn pending_publish_path(&self, checkout: &Path) -> PathBuf {
        self.lock_dir_path(checkout).join(PENDING_PUBLISH_FILE)
    }

    pub fn manifest_path(&self, checkout: &Path) -> PathBuf {
        self.lock_dir_path(checkout).join(MANIFEST_FILE)
    }

    pub fn staging_path(&self, checkout: &Path) -> PathBuf {
        self.lock_dir_path(checkout).join(STAGING_DIR)
    }

    pub fn worktree_path(&self, checkout: &Path) -> PathBuf {
        self.lock_dir_path(checkout).join(WORKTREE_DIR)
    }

    /// `.git/info/exclude` pattern for the lock directory, e.g.
    /// `/.devflow_locks/`.
    pub fn lock_dir_exclude_pattern(&self) -> String {
        let lock = self.reserved_prefixes().pop().unwrap_or_default();
        format!("/{lock}")
    }

    /// Remote-tracking ref for the default branch, e.g. `origin/main`.
    pub fn remote_ref(&self) -> String {
        format!("{}/{}", self.remote, self.default_branch)
    }

    /// Repo-relative prefixes (forward slashes, trailing `/`) that never
    /// appear in a change set.
    pub fn reserved_prefixes(&self) -> Vec<String> {
        [&self.knowledge_base_dir, &self.lock_dir]
            .iter()
            .map(|dir| {
                let mut s = dir.to_string_lossy().replace('\\', "/");
                while s.starts_with("./") {
                    s = s[2..].to_string();
                }
                let trimmed = s.trim_end_matches('/');
                format!("{trimmed}/")
            })
            .collect()
    }

    /// Check values that would otherwise fail deep inside a sync.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_blank("remote", &self.remote)?;
        non_blank("default_branch", &self.default_branch)?;
        non_blank("work_branch", &self.work_branch)?;
        if self.work_branch == self.default_branch {
            return Err(ConfigError::Invalid {
                field: "work_branch",
                reason: "must differ from default_branch".to_string(),
            });
        }
        relative_dir("knowledge_base_dir", &self.knowledge_base_dir)?;
        relative_dir("lock_dir", &self.lock_dir)?;
        if self.lock_dir.starts_with(&self.knowledge_base_dir)
            || self.knowledge_base_dir.starts_with(&self.lock_dir)
        {
            return Err(ConfigError::Invalid {
                field: "lock_dir",
                reason: "must not overlap knowledge_base_dir".to_string(),
            });
        }
        if !(1..=100).contains(&self.git.rename_similarity) {
            return Err(ConfigError::Invalid {
                field: "git.rename_similarity",
                reason: format!("{} is outside 1..=100", self.git.rename_similarity),
            });
        }
        if self.git.command_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "git.command_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn non_blank(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() || value.chars().any(char::is_whitespace) {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("'{value}' must be non-empty and contain no whitespace"),
        });
    }
    Ok(())
}

fn relative_dir(field: &'static str, dir: &Path) -> Result<(), ConfigError> {
    let ok = !dir.as_os_str().is_empty()
        && dir
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !ok {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("'{}' must be a relative path inside the checkout", dir.display()),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// `<home>/.devflow/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".devflow").join("config.yaml")
}

/// Load and validate a config file at an explicit path.
pub fn load_from(path: &Path) -> Result<SyncConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let config: SyncConfig = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

/// Load `<home>/.devflow/config.yaml`, or defaults if it does not exist.
pub fn load_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    load_from(&path)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SyncConfig, ConfigError> {
    load_at(&home()?)
}

/// Atomically save `config` to `path` (`.tmp` sibling, then rename).
pub fn save_to(path: &Path, config: &SyncConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Save to `<home>/.devflow/config.yaml`.
pub fn save_at(home: &Path, config: &SyncConfig) -> Result<PathBuf, ConfigError> {
    let path = config_path_at(home);
    save_to(&path, config)?;
    Ok(path)
}

/// `save_at` convenience wrapper.
pub fn save(config: &SyncConfig) -> Result<PathBuf, ConfigError> {
    save_at(&home()?, config)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
