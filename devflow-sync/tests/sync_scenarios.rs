//! End-to-end sync scenarios against the in-memory VCS.

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use common::{FailingBuilder, Harness, RecordingBuilder};
use devflow_core::{Change, CommitId, SnapshotMeta};
use devflow_sync::{
    BoxError, BranchReview, BuilderRegistry, DirectPush, PublishOutcome, ReviewRequest, ReviewRequester, SyncError,
    SyncOptions, SyncStage, WriterLock,
};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn seed(h: &Harness) -> CommitId {
    h.vcs.upstream(
        &[
            ("README.md", "# widgets\n"),
            ("app/main.py", "import util\n\ndef main():\n    util.run()\n"),
            ("util.py", "def run():\n    pass\n"),
        ],
        &[],
    )
}

fn read_meta(h: &Harness) -> SnapshotMeta {
    let raw = std::fs::read_to_string(h.config.meta_path(h.root())).expect("meta");
    serde_json::from_str(&raw).expect("meta json")
}

fn metadata_keys(h: &Harness) -> Vec<String> {
    let raw = std::fs::read_to_string(h.kb("file-metadata.json")).expect("file-metadata.json");
    let json: Value = serde_json::from_str(&raw).expect("json");
    json.as_object().expect("object").keys().cloned().collect()
}

fn pointer_line(commit: &CommitId) -> String {
    format!("{commit}\n")
}

#[derive(Clone, Default)]
struct RecordingRequester(Rc<RefCell<Vec<ReviewRequest>>>);

impl ReviewRequester for RecordingRequester {
    fn request_review(&self, request: &ReviewRequest) -> Result<String, BoxError> {
        self.0.borrow_mut().push(request.clone());
        Ok(format!("https://example.test/pulls/{}", self.0.borrow().len()))
    }
}

// ---------------------------------------------------------------------------
// First sync and incremental syncs
// ---------------------------------------------------------------------------

#[test]
fn first_sync_lists_every_file_and_publishes() {
    let h = Harness::new();
    let h1 = seed(&h);

    let report = h.sync().expect("sync");

    assert!(report.plan.full_rebuild());
    assert_eq!(report.plan.previous, None);
    assert_eq!(report.plan.head, h1);
    assert_eq!(
        report.plan.changes,
        vec![
            Change::added("README.md"),
            Change::added("app/main.py"),
            Change::added("util.py"),
        ]
    );
    assert_eq!(
        report.stages,
        vec![
            SyncStage::Idle,
            SyncStage::LockAcquired,
            SyncStage::BaseValidated,
            SyncStage::Diffed,
            SyncStage::BuiltArtifacts,
            SyncStage::StateAdvanced,
            SyncStage::Published,
            SyncStage::Done,
        ]
    );

    assert_eq!(h.pointer(), Some(pointer_line(&h1)));
    let meta = read_meta(&h);
    assert_eq!(meta.last_synced_sha, h1.as_str());
    assert_eq!(meta.changed_files, vec!["README.md", "app/main.py", "util.py"]);
    for artifact in ["repo-structure.md", "file-metadata.json", "dependency-graph.json", "README.md"] {
        assert!(h.kb(artifact).is_file(), "{artifact} missing");
    }

    assert!(matches!(report.publish, Some(PublishOutcome::Pushed { ref branch, .. }) if branch == "main"));
    let remote = h.vcs.remote_tree();
    assert_eq!(
        remote.get(".devflow/commit-pointer").map(Vec::as_slice),
        Some(pointer_line(&h1).as_bytes())
    );
    assert!(!h.config.pending_publish_path(h.root()).exists());
    assert!(!h.config.lock_file_path(h.root()).exists());
}

#[test]
fn incremental_sync_keeps_vcs_change_order() {
    let h = Harness::new();
    let h1 = seed(&h);
    h.sync().expect("first sync");

    let h2 = h.vcs.upstream(
        &[("cmd/tool.py", "import util\n"), ("README.md", "# widgets v2\n")],
        &["app/main.py"],
    );
    h.vcs.script_diff(
        &h1,
        &h2,
        vec![
            Change::added("cmd/tool.py"),
            Change::modified("README.md"),
            Change::deleted("app/main.py"),
        ],
    );

    let report = h.sync().expect("second sync");

    assert_eq!(report.plan.base, Some(h1));
    assert_eq!(h.pointer(), Some(pointer_line(&h2)));
    assert_eq!(read_meta(&h).changed_files, vec!["cmd/tool.py", "README.md", "app/main.py"]);
    assert_eq!(metadata_keys(&h), vec!["README.md", "cmd/tool.py", "util.py"]);
}

#[test]
fn sync_with_nothing_new_is_a_noop() {
    let h = Harness::new();
    let h1 = seed(&h);
    h.sync().expect("first sync");
    let meta_before = std::fs::read(h.config.meta_path(h.root())).unwrap();

    let report = h.sync().expect("second sync");

    assert!(report.plan.changes.is_empty());
    assert!(!report.plan.full_rebuild());
    assert!(!report.pointer_advanced());
    assert!(report.written.iter().all(|w| !w.changed()));
    assert_eq!(report.publish, Some(PublishOutcome::Noop));
    assert_eq!(h.vcs.pushes().len(), 1);
    assert_eq!(h.pointer(), Some(pointer_line(&h1)));
    assert_eq!(std::fs::read(h.config.meta_path(h.root())).unwrap(), meta_before);
}

#[test]
fn rename_moves_the_file_entry() {
    let h = Harness::new();
    let h1 = seed(&h);
    h.sync().expect("first sync");

    let h2 = h.vcs.upstream(&[("lib/util.py", "def run():\n    pass\n")], &["util.py"]);
    h.vcs.script_diff(&h1, &h2, vec![Change::renamed("util.py", "lib/util.py")]);

    h.sync().expect("second sync");

    let keys = metadata_keys(&h);
    assert!(keys.contains(&"lib/util.py".to_string()));
    assert!(!keys.contains(&"util.py".to_string()));
    assert_eq!(read_meta(&h).changed_files, vec!["util.py", "lib/util.py"]);
}

#[test]
fn incremental_artifacts_match_a_full_rebuild() {
    let h = Harness::new();
    seed(&h);
    h.sync().expect("first sync");
    h.vcs.upstream(
        &[
            ("app/models.py", "class Widget:\n    pass\n"),
            ("app/main.py", "import util\nfrom app import models\n"),
            ("go.mod", "module example.com/widgets\n"),
        ],
        &["README.md"],
    );
    let incremental = h.sync().expect("incremental sync");
    assert!(!incremental.plan.full_rebuild());

    // Forget the pointer: the dry run rebuilds from scratch and diffs the
    // result against what the incremental run left on disk.
    std::fs::remove_file(h.config.pointer_path(h.root())).unwrap();
    let options = SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    };
    let builders = BuilderRegistry::with_defaults(&h.config);
    let publisher = DirectPush::new(&h.config);
    let full = h.sync_with(&builders, &publisher, options).expect("dry run");

    assert!(full.plan.full_rebuild());
    assert!(full.previews.is_empty(), "artifacts diverged: {:#?}", full.previews);
}

// ---------------------------------------------------------------------------
// Fallbacks
// ---------------------------------------------------------------------------

#[test]
fn unreachable_pointer_forces_full_rebuild() {
    let h = Harness::new();
    let h1 = seed(&h);
    h.sync().expect("first sync");
    h.vcs.make_unreachable(&h1);
    let h2 = h.vcs.upstream(&[("new.py", "x = 1\n")], &[]);

    let report = h.sync().expect("sync");

    assert!(report.plan.full_rebuild());
    assert_eq!(report.plan.previous, Some(h1));
    assert_eq!(
        report.plan.changes,
        vec![
            Change::added("README.md"),
            Change::added("app/main.py"),
            Change::added("new.py"),
            Change::added("util.py"),
        ]
    );
    assert_eq!(h.pointer(), Some(pointer_line(&h2)));
}

#[test]
fn failed_incremental_diff_retries_as_full_listing() {
    let h = Harness::new();
    seed(&h);
    h.sync().expect("first sync");
    h.vcs.upstream(&[("new.py", "x = 1\n")], &[]);
    h.vcs.fail_next_diffs(1);

    let report = h.sync().expect("sync");

    assert!(report.plan.full_rebuild());
    assert_eq!(report.plan.changes.len(), 4);
}

#[test]
fn failed_full_listing_is_fatal() {
    let h = Harness::new();
    let h1 = seed(&h);
    h.sync().expect("first sync");
    h.vcs.upstream(&[("new.py", "x = 1\n")], &[]);
    h.vcs.fail_next_diffs(1);
    h.vcs.fail_listing(true);

    let err = h.sync().unwrap_err();

    assert_eq!(err.stage(), Some(SyncStage::Diffed));
    assert!(matches!(err.root(), SyncError::DiffComputation { .. }));
    assert_eq!(h.pointer(), Some(pointer_line(&h1)));
    assert!(!h.config.lock_file_path(h.root()).exists());
}

#[test]
fn fetch_failure_stops_before_diffing() {
    let h = Harness::new();
    seed(&h);
    h.vcs.fail_fetch(true);

    let err = h.sync().unwrap_err();

    assert_eq!(err.stage(), Some(SyncStage::BaseValidated));
    assert!(matches!(err.root(), SyncError::RefResolution { .. }));
    assert_eq!(h.pointer(), None);
}

// ---------------------------------------------------------------------------
// Atomicity
// ---------------------------------------------------------------------------

#[test]
fn builder_failure_leaves_checkout_untouched() {
    let h = Harness::new();
    seed(&h);
    h.sync().expect("first sync");
    h.vcs.upstream(&[("new.py", "x = 1\n")], &[]);
    let before = h.snapshot();

    let mut builders = BuilderRegistry::with_defaults(&h.config);
    builders.register(FailingBuilder);
    let publisher = DirectPush::new(&h.config);
    let err = h.sync_with(&builders, &publisher, SyncOptions::default()).unwrap_err();

    assert_eq!(err.stage(), Some(SyncStage::BuiltArtifacts));
    assert!(matches!(err.root(), SyncError::Builder { name, .. } if name == "analysis"));
    assert_eq!(h.snapshot(), before);
    assert!(!h.config.staging_path(h.root()).exists());
}

#[test]
fn held_lock_rejects_sync_without_changes() {
    let h = Harness::new();
    seed(&h);
    h.sync().expect("first sync");
    h.vcs.upstream(&[("new.py", "x = 1\n")], &[]);
    let before = h.snapshot();
    let lock_path = h.config.lock_file_path(h.root());
    let held = WriterLock::acquire(&lock_path, h.root(), None).expect("lock");

    let err = h.sync().unwrap_err();

    assert_eq!(err.stage(), Some(SyncStage::LockAcquired));
    match err.root() {
        SyncError::LockBusy { holder, .. } => {
            assert_eq!(holder.as_ref().map(|i| i.pid), Some(std::process::id()));
        }
        other => panic!("expected LockBusy, got {other:?}"),
    }
    assert!(lock_path.exists());
    held.release().unwrap();
    assert_eq!(h.snapshot(), before);
}

#[test]
fn stale_lock_is_reclaimed() {
    let mut h = Harness::new();
    h.config.locks.max_age_secs = Some(60);
    seed(&h);
    let lock_path = h.config.lock_file_path(h.root());
    std::fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
    std::fs::write(
        &lock_path,
        r#"{"pid": 4242, "acquired_at": "2020-01-01T00:00:00Z", "checkout": "/elsewhere"}"#,
    )
    .unwrap();

    h.sync().expect("sync after reclaim");

    assert!(!lock_path.exists());
}

#[test]
fn expired_deadline_fails_before_locking() {
    let h = Harness::new();
    seed(&h);
    let options = SyncOptions {
        deadline: Some(Instant::now()),
        dry_run: false,
    };
    let builders = BuilderRegistry::with_defaults(&h.config);
    let publisher = DirectPush::new(&h.config);

    let err = h.sync_with(&builders, &publisher, options).unwrap_err();

    assert_eq!(err.stage(), Some(SyncStage::LockAcquired));
    assert!(matches!(err.root(), SyncError::Timeout { .. }));
    assert!(!h.config.lock_file_path(h.root()).exists());
    assert!(h.vcs.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

#[test]
fn push_failure_leaves_pending_marker_and_next_sync_rebuilds() {
    let h = Harness::new();
    seed(&h);
    h.sync().expect("first sync");
    let h2 = h.vcs.upstream(&[("new.py", "x = 1\n")], &[]);
    h.vcs.fail_push(true);

    let err = h.sync().unwrap_err();
    assert_eq!(err.stage(), Some(SyncStage::Published));
    assert!(matches!(err.root(), SyncError::Push { .. }));
    assert_eq!(h.pointer(), Some(pointer_line(&h2)));
    assert!(h.config.pending_publish_path(h.root()).exists());

    h.vcs.fail_push(false);
    let report = h.sync().expect("recovery sync");

    assert!(report.plan.full_rebuild());
    assert!(matches!(report.publish, Some(PublishOutcome::Pushed { .. })));
    assert!(!h.config.pending_publish_path(h.root()).exists());
    assert_eq!(
        h.vcs.remote_tree().get(".devflow/commit-pointer").map(Vec::as_slice),
        Some(pointer_line(&h2).as_bytes())
    );
}

#[test]
fn rebase_conflict_aborts_and_keeps_marker() {
    let h = Harness::new();
    seed(&h);
    h.vcs.conflict_on_rebase(true);

    let err = h.sync().unwrap_err();

    assert_eq!(err.stage(), Some(SyncStage::Published));
    assert!(matches!(err.root(), SyncError::PublishConflict { .. }));
    assert!(h.vcs.calls().iter().any(|c| c == "rebase --abort"));
    assert_eq!(h.vcs.calls().last().map(String::as_str), Some("release worktree"));
    assert!(h.vcs.pushes().is_empty());
    assert!(h.config.pending_publish_path(h.root()).exists());
}

#[test]
fn review_policy_pushes_a_branch_and_requests_review() {
    let h = Harness::new();
    let h1 = seed(&h);
    let requester = RecordingRequester::default();
    let publisher = BranchReview::new(&h.config, Box::new(requester.clone()));
    let builders = BuilderRegistry::with_defaults(&h.config);

    let report = h.sync_with(&builders, &publisher, SyncOptions::default()).expect("sync");

    let expected_branch = format!("devflow/sync-{}", h1.short());
    match report.publish {
        Some(PublishOutcome::ReviewRequested { branch, request, .. }) => {
            assert_eq!(branch, expected_branch);
            assert_eq!(request, "https://example.test/pulls/1");
        }
        other => panic!("expected review request, got {other:?}"),
    }
    assert_eq!(h.vcs.pushes(), vec![("_devflow_work".to_string(), expected_branch.clone())]);
    assert_eq!(h.vcs.remote_head(), h1);

    let requests = requester.0.borrow();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].base, "main");
    assert_eq!(requests[0].title, format!("chore(devflow): sync knowledge base for {}", h1.short()));
}

#[test]
fn review_rerun_before_merge_replaces_the_branch() {
    let h = Harness::new();
    let h1 = seed(&h);
    let requester = RecordingRequester::default();
    let publisher = BranchReview::new(&h.config, Box::new(requester.clone()));
    let builders = BuilderRegistry::with_defaults(&h.config);

    h.sync_with(&builders, &publisher, SyncOptions::default()).expect("first review sync");
    let branch = format!("devflow/sync-{}", h1.short());
    let first_tip = h.vcs.remote_branch(&branch).expect("review branch pushed");

    let report = h
        .sync_with(&builders, &publisher, SyncOptions::default())
        .expect("second review sync");

    assert!(!report.plan.full_rebuild());
    assert!(matches!(report.publish, Some(PublishOutcome::ReviewRequested { .. })));
    assert!(!h.config.pending_publish_path(h.root()).exists());
    assert_ne!(h.vcs.remote_branch(&branch), Some(first_tip));
    assert!(h
        .vcs
        .calls()
        .iter()
        .any(|c| c == &format!("push --force-with-lease origin _devflow_work:{branch}")));
    assert_eq!(requester.0.borrow().len(), 2);
    assert_eq!(h.vcs.remote_head(), h1);
}

// ---------------------------------------------------------------------------
// Dry run and custom builders
// ---------------------------------------------------------------------------

#[test]
fn dry_run_previews_without_mutating() {
    let h = Harness::new();
    seed(&h);
    let options = SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    };
    let builders = BuilderRegistry::with_defaults(&h.config);
    let publisher = DirectPush::new(&h.config);

    let report = h.sync_with(&builders, &publisher, options).expect("dry run");

    assert_eq!(report.stages.last(), Some(&SyncStage::Done));
    assert!(report.publish.is_none());
    assert!(report.written.is_empty());
    let files: Vec<&str> = report.previews.iter().map(|p| p.file.as_str()).collect();
    assert!(files.contains(&"README.md"));
    let readme = report.previews.iter().find(|p| p.file == "README.md").unwrap();
    assert!(readme.unified_diff.starts_with("--- a/.devflow/README.md"));

    assert_eq!(h.pointer(), None);
    assert!(!h.config.knowledge_base_path(h.root()).exists());
    assert!(!h.config.staging_path(h.root()).exists());
    assert!(h
        .vcs
        .calls()
        .iter()
        .all(|c| !c.starts_with("checkout") && !c.starts_with("commit") && !c.starts_with("push")));
}

#[test]
fn custom_builder_sees_the_change_set_and_is_listed_in_readme() {
    let h = Harness::new();
    seed(&h);
    let mut builders = BuilderRegistry::with_defaults(&h.config);
    builders.register(RecordingBuilder);
    let publisher = DirectPush::new(&h.config);

    h.sync_with(&builders, &publisher, SyncOptions::default()).expect("sync");

    let recorded = std::fs::read_to_string(h.kb("changes.txt")).unwrap();
    assert_eq!(recorded.lines().count(), 3);
    let readme = std::fs::read_to_string(h.kb("README.md")).unwrap();
    assert!(readme.contains("changes.txt"));
}
