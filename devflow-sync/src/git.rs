//! [`GitCli`]: the [`Vcs`] capability backed by `git` subprocesses.
//!
//! Every invocation is bounded by `min(git.command_timeout_secs, time left
//! until the sync deadline)`. A child that outlives its budget is killed and
//! reported as [`SyncError::Timeout`].
//!
//! Publishing never touches the caller's checkout: the work branch is checked
//! out into a private work tree under the lock directory, and only the
//! knowledge-base subtree is copied into it. Source blobs are read through a
//! single `git cat-file --batch` process per `GitCli`.

use std::cell::RefCell;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use devflow_core::config::{CommitIdentity, GitConfig};
use devflow_core::{Change, CommitId, SyncConfig};

use crate::diff::parse_name_status_z;
use crate::error::{io_err, SyncError};
use crate::vcs::{CommitOutcome, Vcs};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of one finished git invocation.
#[derive(Debug)]
struct GitOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: String,
}

impl GitOutput {
    fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// Runs `git` in one checkout.
#[derive(Debug)]
pub struct GitCli {
    root: PathBuf,
    worktree: PathBuf,
    binary: String,
    command_timeout: Duration,
    rename_similarity: u8,
    identity: CommitIdentity,
    deadline: Option<Instant>,
    blobs: RefCell<Option<BlobSession>>,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>, config: &SyncConfig) -> Self {
        let root = root.into();
        let worktree = config.worktree_path(&root);
        Self::with_git_config(root, worktree, &config.git, &config.publish.identity)
    }

    pub fn with_git_config(
        root: impl Into<PathBuf>,
        worktree: impl Into<PathBuf>,
        git: &GitConfig,
        identity: &CommitIdentity,
    ) -> Self {
        Self {
            root: root.into(),
            worktree: worktree.into(),
            binary: git.binary.clone(),
            command_timeout: git.command_timeout(),
            rename_similarity: git.rename_similarity,
            identity: identity.clone(),
            deadline: None,
            blobs: RefCell::new(None),
        }
    }

    /// Bound every later invocation by an overall sync deadline.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// URL of `remote`, if configured. Used for display only.
    pub fn remote_url(&self, remote: &str) -> Option<String> {
        let out = self.run(&["remote", "get-url", remote]).ok()?;
        if !out.status.success() {
            return None;
        }
        let url = String::from_utf8_lossy(&out.stdout).trim().to_owned();
        (!url.is_empty()).then_some(url)
    }

    // -----------------------------------------------------------------------
    // Process plumbing
    // -----------------------------------------------------------------------

    fn display(args: &[&str]) -> String {
        format!("git {}", args.join(" "))
    }

    fn budget(&self, command: &str) -> Result<Duration, SyncError> {
        let Some(deadline) = self.deadline else {
            return Ok(self.command_timeout);
        };
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(SyncError::Timeout {
                command: command.to_owned(),
                after: Duration::ZERO,
            });
        }
        Ok(left.min(self.command_timeout))
    }

    fn command(&self, dir: &Path, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-c")
            .arg(format!("user.name={}", self.identity.name))
            .arg("-c")
            .arg(format!("user.email={}", self.identity.email))
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C");
        cmd
    }

    /// Run git in the checkout and capture its output, whatever the exit
    /// status.
    fn run(&self, args: &[&str]) -> Result<GitOutput, SyncError> {
        self.run_in(&self.root, args)
    }

    fn run_in(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, SyncError> {
        let command = Self::display(args);
        let budget = self.budget(&command)?;

        let mut child = self
            .command(dir, args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| io_err(dir, e))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let started = Instant::now();

        let status = match wait_until(&mut child, started + budget) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(command = %command, after = ?started.elapsed(), "git command killed at deadline");
                return Err(SyncError::Timeout {
                    command,
                    after: started.elapsed(),
                });
            }
            Err(e) => return Err(io_err(dir, e)),
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = String::from_utf8_lossy(&stderr.join().unwrap_or_default())
            .trim()
            .to_owned();
        tracing::debug!(command = %command, code = ?status.code(), "git finished");
        Ok(GitOutput {
            status,
            stdout,
            stderr,
        })
    }

    /// Run git in the checkout and require a zero exit status.
    fn run_ok(&self, args: &[&str]) -> Result<Vec<u8>, SyncError> {
        self.run_ok_in(&self.root, args)
    }

    fn run_ok_in(&self, dir: &Path, args: &[&str]) -> Result<Vec<u8>, SyncError> {
        let out = self.run_in(dir, args)?;
        if !out.status.success() {
            return Err(SyncError::Vcs {
                command: Self::display(args),
                stderr: out.stderr,
            });
        }
        Ok(out.stdout)
    }

    // -----------------------------------------------------------------------
    // Publish work tree
    // -----------------------------------------------------------------------

    fn worktree_arg(&self) -> String {
        self.worktree.to_string_lossy().into_owned()
    }

    /// Unregister and delete the publish work tree, if any.
    fn remove_worktree(&self) -> Result<(), SyncError> {
        if self.worktree.exists() {
            let dir = self.worktree_arg();
            if let Err(e) = self.run_ok(&["worktree", "remove", "--force", &dir]) {
                tracing::debug!(error = %e, "git worktree remove failed; deleting directly");
            }
            match std::fs::remove_dir_all(&self.worktree) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&self.worktree, e)),
            }
        }
        self.run_ok(&["worktree", "prune"])?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Blob reads
    // -----------------------------------------------------------------------

    /// Read one object through the shared `cat-file --batch` process,
    /// starting it on first use.
    fn read_batched(&self, object: &str) -> Result<Vec<u8>, SyncError> {
        let command = "git cat-file --batch";
        let budget = self.budget(command)?;
        let mut slot = self.blobs.borrow_mut();
        if slot.is_none() {
            *slot = Some(BlobSession::spawn(self.command(&self.root, &["cat-file", "--batch"]), &self.root)?);
        }
        let Some(session) = slot.as_mut() else {
            return Err(SyncError::Vcs {
                command: command.to_owned(),
                stderr: "session unavailable".to_owned(),
            });
        };

        let reply = session.request(object, budget);
        match reply {
            Ok(BatchReply::Object { kind, bytes }) if kind == "blob" => Ok(bytes),
            Ok(BatchReply::Object { kind, .. }) => Err(SyncError::Vcs {
                command: format!("git cat-file blob {object}"),
                stderr: format!("{object} is a {kind}, not a blob"),
            }),
            Ok(BatchReply::Missing) => Err(SyncError::Vcs {
                command: format!("git cat-file blob {object}"),
                stderr: format!("{object} missing"),
            }),
            Err(e) => {
                // The session is unusable after a timeout or a broken pipe.
                *slot = None;
                if let SyncError::Timeout { .. } = e {
                    tracing::warn!(object, "git cat-file --batch killed at deadline");
                }
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// cat-file --batch session
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum BatchReply {
    Object { kind: String, bytes: Vec<u8> },
    Missing,
}

/// A running `git cat-file --batch`. Replies are parsed on a reader thread
/// so a request can give up at its deadline. Killed on drop.
#[derive(Debug)]
struct BlobSession {
    child: Child,
    stdin: ChildStdin,
    replies: Receiver<std::io::Result<BatchReply>>,
    root: PathBuf,
}

impl BlobSession {
    fn spawn(mut cmd: Command, root: &Path) -> Result<Self, SyncError> {
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| io_err(root, e))?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SyncError::Vcs {
                command: "git cat-file --batch".to_owned(),
                stderr: "missing stdio pipes".to_owned(),
            });
        };

        let (tx, replies) = mpsc::channel();
        thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                let reply = read_reply(&mut reader);
                let done = !matches!(reply, Ok(Some(_)));
                let sent = match reply {
                    Ok(Some(reply)) => tx.send(Ok(reply)),
                    Ok(None) => break,
                    Err(e) => tx.send(Err(e)),
                };
                if done || sent.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            child,
            stdin,
            replies,
            root: root.to_path_buf(),
        })
    }

    fn request(&mut self, object: &str, budget: Duration) -> Result<BatchReply, SyncError> {
        writeln!(self.stdin, "{object}")
            .and_then(|_| self.stdin.flush())
            .map_err(|e| io_err(&self.root, e))?;
        match self.replies.recv_timeout(budget) {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(io_err(&self.root, e)),
            Err(RecvTimeoutError::Timeout) => Err(SyncError::Timeout {
                command: format!("git cat-file --batch ({object})"),
                after: budget,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(SyncError::Vcs {
                command: "git cat-file --batch".to_owned(),
                stderr: "process exited".to_owned(),
            }),
        }
    }
}

impl Drop for BlobSession {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// One reply: `<oid> <type> <size>\n<content>\n` or `<object> missing\n`.
/// `Ok(None)` at end of stream.
fn read_reply<R: BufRead>(reader: &mut R) -> std::io::Result<Option<BatchReply>> {
    let mut header = String::new();
    if reader.read_line(&mut header)? == 0 {
        return Ok(None);
    }
    let header = header.trim_end();
    let fields: Vec<&str> = header.split(' ').collect();
    let (kind, size) = match fields.as_slice() {
        [_, kind, size] => match size.parse::<usize>() {
            Ok(size) => (*kind, size),
            Err(_) => return Ok(Some(BatchReply::Missing)),
        },
        _ => return Ok(Some(BatchReply::Missing)),
    };
    let mut bytes = vec![0; size + 1];
    reader.read_exact(&mut bytes)?;
    bytes.truncate(size);
    Ok(Some(BatchReply::Object {
        kind: kind.to_owned(),
        bytes,
    }))
}

/// Replace `dst` with a copy of `src` (file or directory). A missing `src`
/// leaves `dst` removed.
fn mirror(src: &Path, dst: &Path) -> Result<(), SyncError> {
    match std::fs::remove_dir_all(dst) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(_) => match std::fs::remove_file(dst) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(dst, e)),
        },
    }
    if src.is_dir() {
        std::fs::create_dir_all(dst).map_err(|e| io_err(dst, e))?;
        let entries = std::fs::read_dir(src).map_err(|e| io_err(src, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(src, e))?;
            mirror(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else if src.is_file() {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        std::fs::copy(src, dst).map_err(|e| io_err(dst, e))?;
    }
    Ok(())
}

/// Read a child pipe to the end on a helper thread so a chatty child never
/// blocks on a full pipe while we poll it.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Poll `child` until it exits or `deadline` passes (`Ok(None)`).
fn wait_until(child: &mut Child, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn stdout_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_owned()
}

// ---------------------------------------------------------------------------
// Vcs
// ---------------------------------------------------------------------------

impl Vcs for GitCli {
    fn fetch(&self, remote: &str, branch: &str) -> Result<(), SyncError> {
        let out = self.run(&["fetch", "--quiet", remote, branch])?;
        if !out.status.success() {
            return Err(SyncError::RefResolution {
                reference: format!("{remote}/{branch}"),
                message: out.stderr,
            });
        }
        Ok(())
    }

    fn resolve_ref(&self, reference: &str) -> Result<CommitId, SyncError> {
        let spec = format!("{reference}^{{commit}}");
        let out = self.run(&["rev-parse", "--verify", "--quiet", &spec])?;
        let sha = stdout_line(&out.stdout);
        if !out.status.success() || sha.is_empty() {
            return Err(SyncError::RefResolution {
                reference: reference.to_owned(),
                message: if out.stderr.is_empty() {
                    "unknown revision".to_owned()
                } else {
                    out.stderr
                },
            });
        }
        Ok(CommitId::from(sha))
    }

    fn ensure_reachable(&self, commit: &CommitId, head: &CommitId) -> Result<bool, SyncError> {
        let object = format!("{commit}^{{commit}}");
        if !self.run(&["cat-file", "-e", &object])?.status.success() {
            return Ok(false);
        }
        let out = self.run(&["merge-base", "--is-ancestor", commit.as_str(), head.as_str()])?;
        match out.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(SyncError::Vcs {
                command: format!("git merge-base --is-ancestor {commit} {head}"),
                stderr: out.stderr,
            }),
        }
    }

    fn diff_name_status(&self, base: &CommitId, head: &CommitId) -> Result<Vec<Change>, SyncError> {
        let rename = format!("-M{}%", self.rename_similarity);
        let args = [
            "diff",
            "--name-status",
            "-z",
            "--no-color",
            rename.as_str(),
            base.as_str(),
            head.as_str(),
        ];
        let diff_err = |message: String| SyncError::DiffComputation {
            base: base.to_string(),
            head: head.to_string(),
            message,
        };
        let out = self.run(&args)?;
        if !out.status.success() {
            return Err(diff_err(out.stderr));
        }
        parse_name_status_z(&out.stdout).map_err(diff_err)
    }

    fn list_all_files(&self, commit: &CommitId) -> Result<Vec<String>, SyncError> {
        let out = self.run(&["ls-tree", "-r", "-z", "--full-tree", commit.as_str()])?;
        if !out.status.success() {
            return Err(SyncError::DiffComputation {
                base: String::new(),
                head: commit.to_string(),
                message: out.stderr,
            });
        }
        // `<mode> <type> <object>\t<path>`; submodules (`commit`) have no blob to read.
        let files = out
            .stdout
            .split(|&b| b == 0)
            .filter_map(|entry| {
                let entry = String::from_utf8_lossy(entry);
                let (meta, path) = entry.split_once('\t')?;
                (meta.split(' ').nth(1) == Some("blob")).then(|| path.to_owned())
            })
            .collect();
        Ok(files)
    }

    fn read_file(&self, commit: &CommitId, path: &str) -> Result<Vec<u8>, SyncError> {
        let object = format!("{commit}:{path}");
        if path.contains('\n') {
            return self.run_ok(&["cat-file", "blob", &object]);
        }
        self.read_batched(&object)
    }

    fn checkout_branch(&self, name: &str, from: &str) -> Result<(), SyncError> {
        self.remove_worktree()?;
        let dir = self.worktree_arg();
        self.run_ok(&["worktree", "add", "--quiet", "--force", "-B", name, &dir, from])?;
        tracing::debug!(worktree = %dir, branch = name, from, "publish work tree ready");
        Ok(())
    }

    fn stage(&self, paths: &[String]) -> Result<(), SyncError> {
        for path in paths {
            mirror(&self.root.join(path), &self.worktree.join(path))?;
        }
        let mut args = vec!["add", "--force", "--all", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_ok_in(&self.worktree, &args)?;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<CommitOutcome, SyncError> {
        // Exit 0: index matches HEAD.
        let staged = self.run_in(&self.worktree, &["diff", "--cached", "--quiet"])?;
        match staged.code() {
            Some(0) => Ok(CommitOutcome::Noop),
            Some(1) => {
                self.run_ok_in(&self.worktree, &["commit", "--quiet", "--no-verify", "-m", message])?;
                let sha = stdout_line(&self.run_ok_in(&self.worktree, &["rev-parse", "HEAD"])?);
                Ok(CommitOutcome::Committed(CommitId::from(sha)))
            }
            _ => Err(SyncError::Vcs {
                command: "git diff --cached --quiet".to_owned(),
                stderr: staged.stderr,
            }),
        }
    }

    fn rebase_onto(&self, onto: &str) -> Result<(), SyncError> {
        let out = self.run_in(&self.worktree, &["rebase", "--quiet", onto])?;
        if out.status.success() {
            return Ok(());
        }
        if let Err(e) = self.run_ok_in(&self.worktree, &["rebase", "--abort"]) {
            tracing::warn!(error = %e, "rebase --abort failed");
        }
        Err(SyncError::PublishConflict {
            onto: onto.to_owned(),
            detail: out.stderr,
        })
    }

    fn push(&self, remote: &str, local: &str, remote_branch: &str) -> Result<(), SyncError> {
        let refspec = format!("{local}:refs/heads/{remote_branch}");
        let out = self.run(&["push", "--quiet", remote, &refspec])?;
        if !out.status.success() {
            return Err(SyncError::Push {
                local: local.to_owned(),
                remote: format!("{remote}/{remote_branch}"),
                message: out.stderr,
            });
        }
        Ok(())
    }

    fn push_replacing(&self, remote: &str, local: &str, remote_branch: &str) -> Result<(), SyncError> {
        let target = format!("refs/heads/{remote_branch}");
        let listed = self.run_ok(&["ls-remote", remote, &target])?;
        // Empty expectation: the branch must not exist yet.
        let expected = String::from_utf8_lossy(&listed)
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_owned();
        let lease = format!("--force-with-lease={target}:{expected}");
        let refspec = format!("{local}:{target}");
        let out = self.run(&["push", "--quiet", &lease, remote, &refspec])?;
        if !out.status.success() {
            return Err(SyncError::Push {
                local: local.to_owned(),
                remote: format!("{remote}/{remote_branch}"),
                message: out.stderr,
            });
        }
        Ok(())
    }

    fn release_worktree(&self) -> Result<(), SyncError> {
        self.remove_worktree()
    }

    fn exclude_locally(&self, pattern: &str) -> Result<(), SyncError> {
        let out = self.run_ok(&["rev-parse", "--git-path", "info/exclude"])?;
        let path = self.root.join(stdout_line(&out));
        let existing = match std::fs::read_to_string(&path) {
            Ok(existing) => existing,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(io_err(&path, e)),
        };
        if existing.lines().any(|line| line.trim() == pattern) {
            return Ok(());
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(pattern);
        updated.push('\n');
        std::fs::write(&path, updated).map_err(|e| io_err(&path, e))?;
        tracing::debug!(path = %path.display(), pattern, "added local exclude");
        Ok(())
    }
}
