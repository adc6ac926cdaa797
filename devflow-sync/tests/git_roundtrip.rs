//! Round trip against real git: a bare remote, an upstream clone that makes
//! commits, and the checkout being synced. Skipped when `git` is missing.

use std::path::Path;
use std::process::Command;

use devflow_core::{Change, PublishPolicy, SnapshotMeta, SyncConfig};
use devflow_sync::pipeline::{preview_changes, run_sync, status};
use devflow_sync::{KnowledgeBaseStatus, PublishOutcome, SyncOptions};
use tempfile::TempDir;

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok_and(|o| o.status.success())
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(["-c", "user.name=Upstream Dev", "-c", "user.email=dev@example.test"])
        .args(["-c", "init.defaultBranch=main", "-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn write(dir: &Path, path: &str, content: &str) {
    let full = dir.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, content).unwrap();
}

struct Repos {
    _tmp: TempDir,
    remote: std::path::PathBuf,
    upstream: std::path::PathBuf,
    checkout: std::path::PathBuf,
}

fn setup() -> Repos {
    let tmp = TempDir::new().unwrap();
    let remote = tmp.path().join("remote.git");
    let upstream = tmp.path().join("upstream");
    let checkout = tmp.path().join("checkout");
    std::fs::create_dir_all(&remote).unwrap();
    std::fs::create_dir_all(&upstream).unwrap();

    git(&remote, &["init", "--quiet", "--bare"]);
    git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

    git(&upstream, &["init", "--quiet"]);
    git(&upstream, &["checkout", "-q", "-B", "main"]);
    write(&upstream, "README.md", "# widgets\n");
    write(&upstream, "app/main.py", "import util\n\nutil.run()\n");
    write(&upstream, "util.py", "def run():\n    return 42\n");
    git(&upstream, &["add", "."]);
    git(&upstream, &["commit", "-q", "-m", "initial"]);
    git(&upstream, &["remote", "add", "origin", remote.to_str().unwrap()]);
    git(&upstream, &["push", "-q", "origin", "main"]);

    git(
        tmp.path(),
        &["clone", "-q", remote.to_str().unwrap(), checkout.to_str().unwrap()],
    );

    Repos {
        _tmp: tmp,
        remote,
        upstream,
        checkout,
    }
}

fn read_meta(config: &SyncConfig, root: &Path) -> SnapshotMeta {
    let raw = std::fs::read_to_string(config.meta_path(root)).unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[test]
fn sync_publishes_and_tracks_renames() {
    if !git_available() {
        eprintln!("git not found; skipping");
        return;
    }
    let repos = setup();
    let config = SyncConfig::default();
    let initial = git(&repos.upstream, &["rev-parse", "HEAD"]);

    assert_eq!(status(&config, &repos.checkout).unwrap(), KnowledgeBaseStatus::NeverSynced);

    // First sync: full rebuild, pushed to main.
    let report = run_sync(
        &config,
        &repos.checkout,
        PublishPolicy::Direct,
        SyncOptions::default(),
        None,
    )
    .expect("first sync");
    assert!(report.plan.full_rebuild());
    let pushed = match report.publish {
        Some(PublishOutcome::Pushed { commit, .. }) => commit,
        other => panic!("expected push, got {other:?}"),
    };
    assert_eq!(git(&repos.remote, &["rev-parse", "main"]), pushed.as_str());
    assert_eq!(git(&repos.remote, &["show", "main:.devflow/commit-pointer"]), initial);
    assert_eq!(
        git(&repos.remote, &["log", "-1", "--format=%s", "main"]),
        format!("chore(devflow): sync knowledge base for {}", &initial[..7])
    );
    assert!(matches!(
        status(&config, &repos.checkout).unwrap(),
        KnowledgeBaseStatus::Current { .. }
    ));

    // Second sync: the only new commit is our own, so nothing happens.
    let again = run_sync(
        &config,
        &repos.checkout,
        PublishPolicy::Direct,
        SyncOptions::default(),
        None,
    )
    .expect("second sync");
    assert!(again.plan.changes.is_empty());
    assert_eq!(again.publish, Some(PublishOutcome::Noop));
    assert_eq!(git(&repos.remote, &["rev-parse", "main"]), pushed.as_str());

    // Upstream renames a file.
    git(&repos.upstream, &["pull", "-q", "--ff-only", "origin", "main"]);
    std::fs::create_dir_all(repos.upstream.join("lib")).unwrap();
    git(&repos.upstream, &["mv", "util.py", "lib/util.py"]);
    git(&repos.upstream, &["commit", "-q", "-m", "move util"]);
    git(&repos.upstream, &["push", "-q", "origin", "main"]);
    let renamed_head = git(&repos.upstream, &["rev-parse", "HEAD"]);

    let plan = preview_changes(&config, &repos.checkout).expect("changes");
    assert_eq!(plan.changes, vec![Change::renamed("util.py", "lib/util.py")]);

    run_sync(
        &config,
        &repos.checkout,
        PublishPolicy::Direct,
        SyncOptions::default(),
        None,
    )
    .expect("third sync");
    let meta = read_meta(&config, &repos.checkout);
    assert_eq!(meta.last_synced_sha, renamed_head);
    assert_eq!(meta.changed_files, vec!["util.py", "lib/util.py"]);
    assert_eq!(
        git(&repos.remote, &["show", "main:.devflow/commit-pointer"]),
        renamed_head
    );
}

#[test]
fn publishing_leaves_the_callers_checkout_alone() {
    if !git_available() {
        eprintln!("git not found; skipping");
        return;
    }
    let repos = setup();
    let config = SyncConfig::default();
    let edited = "def run():\n    return 43  # local experiment\n";
    write(&repos.checkout, "util.py", edited);
    write(&repos.checkout, "scratch.txt", "notes\n");
    git(&repos.checkout, &["add", "scratch.txt"]);
    let branch_before = git(&repos.checkout, &["rev-parse", "--abbrev-ref", "HEAD"]);
    let head_before = git(&repos.checkout, &["rev-parse", "HEAD"]);

    let report = run_sync(
        &config,
        &repos.checkout,
        PublishPolicy::Direct,
        SyncOptions::default(),
        None,
    )
    .expect("sync");

    assert!(matches!(report.publish, Some(PublishOutcome::Pushed { .. })));
    assert_eq!(git(&repos.checkout, &["rev-parse", "--abbrev-ref", "HEAD"]), branch_before);
    assert_eq!(git(&repos.checkout, &["rev-parse", "HEAD"]), head_before);
    assert_eq!(std::fs::read_to_string(repos.checkout.join("util.py")).unwrap(), edited);
    assert_eq!(git(&repos.checkout, &["diff", "--cached", "--name-only"]), "scratch.txt");
    // The published commit only carries the knowledge base.
    let published = git(&repos.remote, &["diff", "--name-only", "main~1", "main"]);
    assert!(published.lines().all(|p| p.starts_with(".devflow/")), "{published}");
    assert_eq!(git(&repos.remote, &["show", "main:util.py"]), "def run():\n    return 42");

    // The lock directory never shows up as untracked, and the publish work
    // tree is gone once the sync returns.
    let status = git(&repos.checkout, &["status", "--porcelain", "--untracked-files=all"]);
    assert!(!status.contains(".devflow_locks"), "{status}");
    assert!(!config.worktree_path(&repos.checkout).exists());
    assert!(!git(&repos.checkout, &["worktree", "list"]).contains("publish-worktree"));
}

#[test]
fn review_sync_can_run_twice_before_merge() {
    if !git_available() {
        eprintln!("git not found; skipping");
        return;
    }
    let repos = setup();
    let config = SyncConfig::default();
    let initial = git(&repos.upstream, &["rev-parse", "HEAD"]);
    let branch = format!("devflow/sync-{}", &initial[..7]);

    for attempt in 1..=2 {
        let report = run_sync(
            &config,
            &repos.checkout,
            PublishPolicy::Review,
            SyncOptions::default(),
            None,
        )
        .unwrap_or_else(|e| panic!("review sync {attempt}: {e}"));
        match report.publish {
            Some(PublishOutcome::ReviewRequested { branch: pushed, .. }) => assert_eq!(pushed, branch),
            other => panic!("review sync {attempt}: expected review request, got {other:?}"),
        }
        assert!(!config.pending_publish_path(&repos.checkout).exists());
    }

    assert_eq!(
        git(&repos.remote, &["show", &format!("{branch}:.devflow/commit-pointer")]),
        initial
    );
    assert_eq!(git(&repos.remote, &["rev-parse", "main"]), initial);
}
