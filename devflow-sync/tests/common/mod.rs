//! In-memory VCS and helper builders for orchestrator tests.
//!
//! `FakeVcs` models a single remote branch with linear history. Knowledge
//! base files are read from the real checkout directory when staged, so the
//! orchestrator's on-disk behavior is exercised end to end.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use devflow_core::{Change, CommitId, RepositoryCheckout, SyncConfig};
use devflow_renderer::TemplateEngine;
use devflow_sync::{
    ArtifactOutput, BoxError, BuildContext, BuildError, Builder, BuilderRegistry, CommitOutcome, DirectPush,
    Orchestrator, Publisher, SyncError, SyncOptions, SyncReport, Vcs,
};
use tempfile::TempDir;

pub type Tree = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Default)]
struct Inner {
    trees: BTreeMap<String, Tree>,
    parents: BTreeMap<String, Option<String>>,
    remote_head: Option<String>,
    fetched_head: Option<String>,
    head: Option<String>,
    branch: Option<String>,
    remote_branches: BTreeMap<String, String>,
    index: Option<Tree>,
    unreachable: BTreeSet<String>,
    scripted: BTreeMap<(String, String), Vec<Change>>,
    next_id: usize,
    calls: Vec<String>,
    pushes: Vec<(String, String)>,
    fail_diffs: usize,
    fail_list: bool,
    fail_fetch: bool,
    fail_push: bool,
    conflict: bool,
}

pub struct FakeVcs {
    root: PathBuf,
    kb: String,
    inner: RefCell<Inner>,
}

impl FakeVcs {
    pub fn new(root: &Path, config: &SyncConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            kb: config.knowledge_base_dir.to_string_lossy().into_owned(),
            inner: RefCell::new(Inner::default()),
        }
    }

    fn mint(&self, tree: Tree, parent: Option<String>) -> String {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = format!("{:040x}", 0xc0ffee_u64 * 1000 + inner.next_id as u64);
        inner.trees.insert(id.clone(), tree);
        inner.parents.insert(id.clone(), parent);
        id
    }

    /// Commit on the remote branch: `set` files are written, `delete` removed.
    pub fn upstream(&self, set: &[(&str, &str)], delete: &[&str]) -> CommitId {
        let parent = self.inner.borrow().remote_head.clone();
        let mut tree = parent
            .as_ref()
            .map(|p| self.inner.borrow().trees[p].clone())
            .unwrap_or_default();
        for (path, content) in set {
            tree.insert(path.to_string(), content.as_bytes().to_vec());
        }
        for path in delete {
            tree.remove(*path);
        }
        let id = self.mint(tree, parent);
        self.inner.borrow_mut().remote_head = Some(id.clone());
        CommitId::from(id)
    }

    pub fn remote_head(&self) -> CommitId {
        CommitId::from(self.inner.borrow().remote_head.clone().unwrap_or_default())
    }

    pub fn remote_tree(&self) -> Tree {
        let inner = self.inner.borrow();
        inner
            .remote_head
            .as_ref()
            .map(|h| inner.trees[h].clone())
            .unwrap_or_default()
    }

    pub fn script_diff(&self, base: &CommitId, head: &CommitId, changes: Vec<Change>) {
        self.inner
            .borrow_mut()
            .scripted
            .insert((base.to_string(), head.to_string()), changes);
    }

    pub fn make_unreachable(&self, commit: &CommitId) {
        self.inner.borrow_mut().unreachable.insert(commit.to_string());
    }

    pub fn fail_next_diffs(&self, n: usize) {
        self.inner.borrow_mut().fail_diffs = n;
    }

    pub fn fail_listing(&self, fail: bool) {
        self.inner.borrow_mut().fail_list = fail;
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.inner.borrow_mut().fail_fetch = fail;
    }

    pub fn fail_push(&self, fail: bool) {
        self.inner.borrow_mut().fail_push = fail;
    }

    pub fn conflict_on_rebase(&self, conflict: bool) {
        self.inner.borrow_mut().conflict = conflict;
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.borrow().calls.clone()
    }

    pub fn pushes(&self) -> Vec<(String, String)> {
        self.inner.borrow().pushes.clone()
    }

    /// Tip of a non-default remote branch, e.g. a review branch.
    pub fn remote_branch(&self, name: &str) -> Option<CommitId> {
        self.inner.borrow().remote_branches.get(name).cloned().map(CommitId::from)
    }

    pub fn clear_calls(&self) {
        self.inner.borrow_mut().calls.clear();
    }

    fn record(&self, call: String) {
        self.inner.borrow_mut().calls.push(call);
    }

    fn tree(&self, commit: &str) -> Option<Tree> {
        self.inner.borrow().trees.get(commit).cloned()
    }

    fn is_ancestor(&self, ancestor: &str, of: &str) -> bool {
        let inner = self.inner.borrow();
        let mut cursor = Some(of.to_string());
        while let Some(c) = cursor {
            if c == ancestor {
                return true;
            }
            cursor = inner.parents.get(&c).cloned().flatten();
        }
        false
    }

    /// The knowledge-base subtree as currently on disk.
    fn kb_on_disk(&self) -> Tree {
        let mut out = Tree::new();
        let dir = self.root.join(&self.kb);
        collect(&dir, &dir, &self.kb, &mut out);
        out
    }

    fn kb_prefix(&self) -> String {
        format!("{}/", self.kb)
    }
}

fn collect(root: &Path, dir: &Path, prefix: &str, out: &mut Tree) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(root, &path, prefix, out);
        } else {
            let rel = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
            out.insert(format!("{prefix}/{rel}"), std::fs::read(&path).unwrap());
        }
    }
}

impl Vcs for FakeVcs {
    fn fetch(&self, remote: &str, branch: &str) -> Result<(), SyncError> {
        self.record(format!("fetch {remote} {branch}"));
        let mut inner = self.inner.borrow_mut();
        if inner.fail_fetch {
            return Err(SyncError::RefResolution {
                reference: format!("{remote}/{branch}"),
                message: "could not read from remote repository".to_string(),
            });
        }
        inner.fetched_head = inner.remote_head.clone();
        Ok(())
    }

    fn resolve_ref(&self, reference: &str) -> Result<CommitId, SyncError> {
        self.record(format!("resolve {reference}"));
        let inner = self.inner.borrow();
        let found = match reference {
            "HEAD" => inner.head.clone(),
            r if inner.branch.as_deref() == Some(r) => inner.head.clone(),
            r if r.contains('/') => inner.fetched_head.clone(),
            r => inner.trees.contains_key(r).then(|| r.to_string()),
        };
        found.map(CommitId::from).ok_or_else(|| SyncError::RefResolution {
            reference: reference.to_string(),
            message: "unknown revision".to_string(),
        })
    }

    fn ensure_reachable(&self, commit: &CommitId, head: &CommitId) -> Result<bool, SyncError> {
        self.record(format!("reachable {commit}"));
        if self.inner.borrow().unreachable.contains(commit.as_str()) {
            return Ok(false);
        }
        Ok(self.tree(commit.as_str()).is_some() && self.is_ancestor(commit.as_str(), head.as_str()))
    }

    fn diff_name_status(&self, base: &CommitId, head: &CommitId) -> Result<Vec<Change>, SyncError> {
        self.record(format!("diff {base} {head}"));
        {
            let mut inner = self.inner.borrow_mut();
            if inner.fail_diffs > 0 {
                inner.fail_diffs -= 1;
                return Err(SyncError::DiffComputation {
                    base: base.to_string(),
                    head: head.to_string(),
                    message: "fatal: bad object".to_string(),
                });
            }
            if let Some(changes) = inner.scripted.get(&(base.to_string(), head.to_string())) {
                return Ok(changes.clone());
            }
        }
        let (Some(old), Some(new)) = (self.tree(base.as_str()), self.tree(head.as_str())) else {
            return Err(SyncError::DiffComputation {
                base: base.to_string(),
                head: head.to_string(),
                message: "unknown commit".to_string(),
            });
        };
        let paths: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
        Ok(paths
            .into_iter()
            .filter_map(|p| match (old.get(p), new.get(p)) {
                (None, Some(_)) => Some(Change::added(p.clone())),
                (Some(_), None) => Some(Change::deleted(p.clone())),
                (Some(a), Some(b)) if a != b => Some(Change::modified(p.clone())),
                _ => None,
            })
            .collect())
    }

    fn list_all_files(&self, commit: &CommitId) -> Result<Vec<String>, SyncError> {
        self.record(format!("ls {commit}"));
        if self.inner.borrow().fail_list {
            return Err(SyncError::DiffComputation {
                base: String::new(),
                head: commit.to_string(),
                message: "ls-tree failed".to_string(),
            });
        }
        self.tree(commit.as_str())
            .map(|t| t.keys().cloned().collect())
            .ok_or_else(|| SyncError::Vcs {
                command: format!("ls-tree {commit}"),
                stderr: "unknown commit".to_string(),
            })
    }

    fn read_file(&self, commit: &CommitId, path: &str) -> Result<Vec<u8>, SyncError> {
        self.tree(commit.as_str())
            .and_then(|t| t.get(path).cloned())
            .ok_or_else(|| SyncError::Vcs {
                command: format!("cat-file blob {commit}:{path}"),
                stderr: "path does not exist".to_string(),
            })
    }

    fn checkout_branch(&self, name: &str, from: &str) -> Result<(), SyncError> {
        self.record(format!("checkout {name} {from}"));
        let target = self.resolve_ref(from)?;
        let mut inner = self.inner.borrow_mut();
        inner.head = Some(target.to_string());
        inner.branch = Some(name.to_string());
        inner.index = None;
        Ok(())
    }

    fn stage(&self, paths: &[String]) -> Result<(), SyncError> {
        self.record(format!("stage {}", paths.join(" ")));
        let head = self.inner.borrow().head.clone().unwrap_or_default();
        let mut tree = self.tree(&head).unwrap_or_default();
        let prefix = self.kb_prefix();
        tree.retain(|p, _| !p.starts_with(&prefix));
        tree.extend(self.kb_on_disk());
        self.inner.borrow_mut().index = Some(tree);
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<CommitOutcome, SyncError> {
        self.record(format!("commit {message}"));
        let head = self.inner.borrow().head.clone().unwrap_or_default();
        let current = self.tree(&head).unwrap_or_default();
        let Some(index) = self.inner.borrow_mut().index.take() else {
            return Ok(CommitOutcome::Noop);
        };
        if index == current {
            return Ok(CommitOutcome::Noop);
        }
        let id = self.mint(index, Some(head));
        self.inner.borrow_mut().head = Some(id.clone());
        Ok(CommitOutcome::Committed(CommitId::from(id)))
    }

    fn rebase_onto(&self, onto: &str) -> Result<(), SyncError> {
        self.record(format!("rebase {onto}"));
        if self.inner.borrow().conflict {
            self.record("rebase --abort".to_string());
            return Err(SyncError::PublishConflict {
                onto: onto.to_string(),
                detail: "CONFLICT (content): Merge conflict in .devflow/README.md".to_string(),
            });
        }
        let onto_id = self.resolve_ref(onto)?.to_string();
        let head = self.inner.borrow().head.clone().unwrap_or_default();
        let parent = self.inner.borrow().parents.get(&head).cloned().flatten();
        if parent.as_deref() == Some(onto_id.as_str()) {
            return Ok(());
        }
        // Replay the knowledge-base commit on top of `onto`.
        let prefix = self.kb_prefix();
        let ours = self.tree(&head).unwrap_or_default();
        let mut tree = self.tree(&onto_id).unwrap_or_default();
        tree.retain(|p, _| !p.starts_with(&prefix));
        tree.extend(ours.into_iter().filter(|(p, _)| p.starts_with(&prefix)));
        let id = self.mint(tree, Some(onto_id));
        self.inner.borrow_mut().head = Some(id);
        Ok(())
    }

    fn push(&self, remote: &str, local: &str, remote_branch: &str) -> Result<(), SyncError> {
        self.record(format!("push {remote} {local}:{remote_branch}"));
        self.push_to(remote, local, remote_branch, false)
    }

    fn push_replacing(&self, remote: &str, local: &str, remote_branch: &str) -> Result<(), SyncError> {
        self.record(format!("push --force-with-lease {remote} {local}:{remote_branch}"));
        self.push_to(remote, local, remote_branch, true)
    }

    fn release_worktree(&self) -> Result<(), SyncError> {
        self.record("release worktree".to_string());
        Ok(())
    }
}

impl FakeVcs {
    fn push_to(&self, remote: &str, local: &str, remote_branch: &str, replace: bool) -> Result<(), SyncError> {
        let rejected = |message: &str| SyncError::Push {
            local: local.to_string(),
            remote: format!("{remote}/{remote_branch}"),
            message: message.to_string(),
        };
        if self.inner.borrow().fail_push {
            return Err(rejected("permission denied"));
        }
        let head = self.inner.borrow().head.clone().unwrap_or_default();
        let current = if remote_branch == "main" {
            self.inner.borrow().remote_head.clone()
        } else {
            self.inner.borrow().remote_branches.get(remote_branch).cloned()
        };
        if let Some(current) = current {
            if !replace && !self.is_ancestor(&current, &head) {
                return Err(rejected("non-fast-forward"));
            }
        }

        let mut inner = self.inner.borrow_mut();
        inner.pushes.push((local.to_string(), remote_branch.to_string()));
        if remote_branch == "main" {
            // Like git, a successful push also moves the remote-tracking ref.
            inner.remote_head = Some(head.clone());
            inner.fetched_head = Some(head);
        } else {
            inner.remote_branches.insert(remote_branch.to_string(), head);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builders for tests
// ---------------------------------------------------------------------------

/// Writes `changes.txt`: one line per change it was given.
pub struct RecordingBuilder;

impl Builder for RecordingBuilder {
    fn name(&self) -> &str {
        "recording"
    }

    fn outputs(&self) -> Vec<ArtifactOutput> {
        vec![ArtifactOutput::new("changes.txt", "Changes seen by the last build")]
    }

    fn build(&self, ctx: &BuildContext<'_>, changes: &[Change]) -> Result<(), BuildError> {
        let lines: Vec<String> = changes.iter().map(ToString::to_string).collect();
        ctx.write("changes.txt", lines.join("\n"))?;
        Ok(())
    }
}

/// Always fails, after writing a partial artifact into staging.
pub struct FailingBuilder;

impl Builder for FailingBuilder {
    fn name(&self) -> &str {
        "analysis"
    }

    fn outputs(&self) -> Vec<ArtifactOutput> {
        vec![ArtifactOutput::new("repo-analysis.md", "Analysis")]
    }

    fn build(&self, ctx: &BuildContext<'_>, _changes: &[Change]) -> Result<(), BuildError> {
        ctx.write("repo-analysis.md", "partial")?;
        let err: BoxError = "model endpoint returned 503".into();
        Err(err)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub dir: TempDir,
    pub config: SyncConfig,
    pub vcs: FakeVcs,
    pub templates: TemplateEngine,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let config = SyncConfig::default();
        let vcs = FakeVcs::new(dir.path(), &config);
        Self {
            dir,
            config,
            vcs,
            templates: TemplateEngine::new(None).expect("templates"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn checkout(&self) -> RepositoryCheckout {
        RepositoryCheckout::new(self.root()).with_remote("https://github.com/acme/widgets.git")
    }

    pub fn kb(&self, name: &str) -> PathBuf {
        self.config.knowledge_base_path(self.root()).join(name)
    }

    pub fn pointer(&self) -> Option<String> {
        std::fs::read_to_string(self.config.pointer_path(self.root())).ok()
    }

    pub fn sync_with(
        &self,
        builders: &BuilderRegistry,
        publisher: &dyn Publisher,
        options: SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        Orchestrator::new(&self.config, &self.vcs, builders, publisher, &self.templates)
            .sync(&self.checkout(), &options)
    }

    /// Default builders, direct push, no deadline.
    pub fn sync(&self) -> Result<SyncReport, SyncError> {
        let builders = BuilderRegistry::with_defaults(&self.config);
        let publisher = DirectPush::new(&self.config);
        self.sync_with(&builders, &publisher, SyncOptions::default())
    }

    /// Every file under the checkout root, for byte-for-byte comparisons.
    pub fn snapshot(&self) -> Tree {
        let mut out = Tree::new();
        collect(self.root(), self.root(), ".", &mut out);
        out
    }
}
