//! End-to-end behaviour of the push pipeline against the in-memory remote.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::time::Duration;

use autosync_core::{RemoteBlobSet, SyncConfig};
use autosync_remote::{ApiError, MemoryRemote, Operation, RetryPolicy};
use autosync_sync::{diff, snapshot, PathRules, Pipeline, PipelineOutcome, SkipReason};
use tempfile::TempDir;

struct Fixture {
    home: TempDir,
    root: TempDir,
    remote: Arc<MemoryRemote>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_remote(MemoryRemote::new())
    }

    fn with_remote(remote: MemoryRemote) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            home: TempDir::new().expect("home"),
            root: TempDir::new().expect("root"),
            remote: Arc::new(remote),
        }
    }

    fn config(&self) -> SyncConfig {
        let mut config = SyncConfig::new("octo", "notes", "token", self.root.path().to_path_buf());
        config.comment_delay_seconds = 0;
        config.recovery.delay_seconds = 0;
        config
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.config(), self.remote.clone(), self.home.path())
            .with_retry(RetryPolicy::immediate(1))
    }

    fn write(&self, rel: &str, contents: &str) {
        let path = self.root.path().join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }
}

/// Run once and wait for the comment thread so mutation counts settle.
fn run_and_settle(pipeline: &Pipeline) -> PipelineOutcome {
    let mut outcome = pipeline.run_once().expect("pipeline run");
    if let PipelineOutcome::Pushed(summary) = &mut outcome {
        if let Some(handle) = summary.comment.take() {
            handle.join().expect("comment thread");
        }
    }
    outcome
}

fn remote_set_of(root: &Path) -> RemoteBlobSet {
    snapshot::build(root, &[])
        .expect("snapshot")
        .into_values()
        .map(|record| (record.relative_path, Some(record.blob_id)))
        .collect()
}

#[test]
fn diff_of_a_snapshot_against_itself_is_empty() {
    let fx = Fixture::new();
    fx.write("a.md", "a");
    fx.write("notes/b.json", "{}");

    let rules = PathRules::from_config(&fx.config());
    let local = snapshot::build(fx.root.path(), rules.ignored_dir_names()).unwrap();
    let changes = diff::compute(&local, &remote_set_of(fx.root.path()), &rules);

    assert!(changes.is_empty());
    assert_eq!(changes.unchanged, vec!["a.md", "notes/b.json"]);
}

#[test]
fn every_tracked_path_lands_in_exactly_one_bucket() {
    let fx = Fixture::new();
    fx.write("same.md", "same");
    fx.write("edited.md", "new");
    fx.write("fresh.md", "fresh");
    fx.write("image.png", "binary");
    fx.write("listed.md", "listed");

    let mut remote = RemoteBlobSet::new();
    remote.insert("same.md", Some(autosync_remote::blob_id(b"same")));
    remote.insert("edited.md", Some(autosync_remote::blob_id(b"old")));
    remote.insert("gone.md", Some(autosync_remote::blob_id(b"gone")));
    remote.insert("unknown.md", None);
    remote.insert("listed.md", None);

    let rules = PathRules::from_config(&fx.config());
    let local = snapshot::build(fx.root.path(), rules.ignored_dir_names()).unwrap();
    let changes = diff::compute(&local, &remote, &rules);

    assert_eq!(changes.added, vec!["fresh.md"]);
    assert_eq!(changes.modified, vec!["edited.md", "listed.md"]);
    assert_eq!(changes.deleted, vec!["gone.md", "unknown.md"]);
    assert_eq!(changes.unchanged, vec!["same.md"]);

    let mut seen = BTreeSet::new();
    for path in changes
        .added
        .iter()
        .chain(&changes.modified)
        .chain(&changes.deleted)
        .chain(&changes.unchanged)
    {
        assert!(seen.insert(path.as_str()), "{path} classified twice");
    }
    assert_eq!(seen.len(), 6);
    assert!(!seen.contains("image.png"));
}

#[test]
fn second_run_without_changes_makes_no_remote_calls_that_mutate() {
    let fx = Fixture::new();
    fx.write("a.md", "# a\n");
    let pipeline = fx.pipeline();

    assert!(run_and_settle(&pipeline).is_pushed());
    let after_first = fx.remote.mutation_count();

    let outcome = run_and_settle(&pipeline);
    assert!(matches!(outcome, PipelineOutcome::Skipped(SkipReason::NothingToSync)));
    assert_eq!(fx.remote.mutation_count(), after_first);
}

#[test]
fn deleted_file_is_archived_locally_and_remotely() {
    let fx = Fixture::new();
    fx.write("notes/a.md", "keep me\n");
    fx.write("b.md", "b");
    let pipeline = fx.pipeline();
    assert!(run_and_settle(&pipeline).is_pushed());

    fs::remove_file(fx.root.path().join("notes/a.md")).unwrap();
    let PipelineOutcome::Pushed(summary) = run_and_settle(&pipeline) else {
        panic!("deletion should push");
    };
    assert_eq!(summary.changes.deleted, vec!["notes/a.md"]);
    assert_eq!(summary.archive.archived.len(), 1);

    let archived = fx.root.path().join("deleted_files/notes_a.md");
    assert_eq!(fs::read_to_string(archived).unwrap(), "keep me\n");

    let files = fx.remote.branch_files("main");
    assert!(!files.contains_key("notes/a.md"));
    assert_eq!(files["deleted_files/notes_a.md"], b"keep me\n");
    assert_eq!(files["b.md"], b"b");

    // Archived files are not themselves treated as changes.
    assert!(matches!(
        run_and_settle(&pipeline),
        PipelineOutcome::Skipped(SkipReason::NothingToSync)
    ));
}

#[test]
fn diverged_remote_is_backed_up_and_local_wins() {
    let fx = Fixture::new();
    fx.write("a.md", "v1");
    let pipeline = fx.pipeline();
    assert!(run_and_settle(&pipeline).is_pushed());

    fx.write("a.md", "v2");
    fx.remote.before_next(Operation::CreateTree, |remote| {
        remote.push_foreign_commit("main", &[("a.md", b"edited elsewhere".as_slice())]);
    });

    let PipelineOutcome::Pushed(summary) = run_and_settle(&pipeline) else {
        panic!("diverged run should still push");
    };
    let autosync_sync::ConflictOutcome::Diverged { backup_branch, .. } = &summary.conflict else {
        panic!("expected divergence, got {:?}", summary.conflict);
    };
    assert!(backup_branch.starts_with("Conflict_"));
    assert!(fx.remote.branches().contains(backup_branch));
    assert_eq!(fx.remote.branch_files(backup_branch)["a.md"], b"edited elsewhere");
    assert_eq!(fx.remote.branch_files("main")["a.md"], b"v2");
}

#[test]
fn recovery_gives_up_after_max_retries() {
    let fx = Fixture::new();
    fx.write("a.md", "a");
    fx.remote.fail_next(
        Operation::BranchHead,
        ApiError::Transport {
            op: Operation::BranchHead,
            message: "connection refused".into(),
        },
        4,
    );

    let result = fx.pipeline().run_with_recovery();
    assert!(result.is_err());
    assert_eq!(fx.remote.call_count(Operation::BranchHead), 4);
    assert_eq!(fx.remote.mutation_count(), 0);
}

#[test]
fn incomplete_remote_listing_stops_the_push() {
    let fx = Fixture::new();
    fx.write("a.md", "a");
    fx.write("b.md", "b");
    let pipeline = fx.pipeline();
    assert!(run_and_settle(&pipeline).is_pushed());
    let after_first = fx.remote.mutation_count();

    fx.write("c.md", "c");
    fx.remote.fail_next(
        Operation::TreeListing,
        ApiError::Truncated {
            op: Operation::TreeListing,
            tree_sha: "t".into(),
        },
        1,
    );

    let err = pipeline.run_with_recovery().unwrap_err();
    assert!(!err.is_recoverable(), "got {err}");
    assert_eq!(fx.remote.mutation_count(), after_first);
    let files = fx.remote.branch_files("main");
    assert_eq!(files.len(), 2);
    assert_eq!(files["b.md"], b"b");
}

#[test]
fn recovery_succeeds_once_the_remote_comes_back() {
    let fx = Fixture::new();
    fx.write("a.md", "a");
    fx.remote.fail_next(
        Operation::BranchHead,
        ApiError::Status {
            op: Operation::BranchHead,
            status: 502,
            message: "bad gateway".into(),
        },
        2,
    );

    let outcome = fx.pipeline().run_with_recovery().unwrap();
    assert!(outcome.is_pushed());
    assert_eq!(fx.remote.branch_files("main")["a.md"], b"a");
}

#[test]
fn concurrent_pipelines_push_once() {
    let fx = Fixture::with_remote(MemoryRemote::new().with_latency(Duration::from_millis(20)));
    fx.write("a.md", "a");
    let first = fx.pipeline();
    let second = fx.pipeline();
    let barrier = Barrier::new(2);

    let (a, b) = std::thread::scope(|scope| {
        let a = scope.spawn(|| {
            barrier.wait();
            run_and_settle(&first)
        });
        let b = scope.spawn(|| {
            barrier.wait();
            run_and_settle(&second)
        });
        (a.join().unwrap(), b.join().unwrap())
    });

    let pushed = [&a, &b].iter().filter(|o| o.is_pushed()).count();
    let contended = [&a, &b]
        .iter()
        .filter(|o| matches!(o, PipelineOutcome::Skipped(SkipReason::Contended)))
        .count();
    assert_eq!((pushed, contended), (1, 1));
}
