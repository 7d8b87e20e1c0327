use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio::time::Instant;

use autosync_core::{config, paths};
use autosync_remote::HttpRemote;
use autosync_sync::paths::is_transient_artifact;
use autosync_sync::{PathRules, Pipeline, PipelineOutcome};

use crate::error::{io_err, DaemonError};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::scheduler::DebounceScheduler;

struct SyncJob {
    source: &'static str,
    respond_to: Option<oneshot::Sender<Result<RunSummary, String>>>,
}

/// Result of one pipeline run as reported over the socket.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub source: String,
    pub pushed: bool,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub changed: usize,
    pub finished_at_unix: u64,
    pub duration_ms: u128,
}

impl RunSummary {
    fn from_outcome(source: &str, outcome: &PipelineOutcome, duration: Duration) -> Self {
        let (commit, changed) = match outcome {
            PipelineOutcome::Pushed(summary) => (
                Some(summary.push.commit_sha.clone()),
                summary.changes.total(),
            ),
            PipelineOutcome::Skipped(_) => (None, 0),
        };
        Self {
            source: source.to_string(),
            pushed: outcome.is_pushed(),
            outcome: outcome.describe(),
            commit,
            changed,
            finished_at_unix: unix_seconds_now(),
            duration_ms: duration.as_millis(),
        }
    }
}

#[derive(Debug, Default)]
struct RunHistory {
    runs: u64,
    failures: u64,
    last_run: Option<RunSummary>,
    last_error: Option<String>,
}

/// Everything the socket handlers need to answer `status`.
struct DaemonContext {
    home: PathBuf,
    pipeline: Arc<Pipeline>,
    scheduler: Arc<DebounceScheduler>,
    history: RwLock<RunHistory>,
    started_at_unix: u64,
}

/// Load the config, start the runtime and block until the daemon exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run against the remote named in `<home>/.autosync/config.yaml`.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&home)?;
    let remote = Arc::new(HttpRemote::from_config(&config));
    let pipeline = Arc::new(Pipeline::new(config, remote, &home));
    serve(home, pipeline).await
}

/// Run the watcher, processor and socket server until `stop` or ctrl-c.
pub async fn serve(home: PathBuf, pipeline: Arc<Pipeline>) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let scheduler = Arc::new(DebounceScheduler::new(pipeline.config().debounce()));
    let context = Arc::new(DaemonContext {
        home: home.clone(),
        pipeline: pipeline.clone(),
        scheduler: scheduler.clone(),
        history: RwLock::new(RunHistory::default()),
        started_at_unix: unix_seconds_now(),
    });

    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let (pause_tx, pause_rx) = watch::channel(false);

    tracing::info!(
        repo = %pipeline.config().slug(),
        branch = %pipeline.config().branch,
        root = %pipeline.config().watched_root.display(),
        debounce = ?scheduler.delay(),
        "autosync daemon starting",
    );

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let root = pipeline.config().watched_root.clone();
        let rules = pipeline.rules().clone();
        let scheduler = scheduler.clone();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result =
                watcher_task(root, rules, scheduler, sync_tx, pause_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let context = context.clone();
        tokio::spawn(async move {
            let result = processor_task(context, sync_rx, pause_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let context = context.clone();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(context, sync_tx, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    drop(sync_tx);
    let (watcher_result, processor_result, socket_result, signal_result) =
        tokio::join!(watcher_handle, processor_handle, socket_handle, signal_handle);

    scheduler.cancel();
    handle_join("watcher", watcher_result)?;
    handle_join("processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("autosync daemon stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

async fn watcher_task(
    root: PathBuf,
    rules: PathRules,
    scheduler: Arc<DebounceScheduler>,
    sync_tx: mpsc::Sender<SyncJob>,
    mut pause_rx: watch::Receiver<bool>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    // Events arrive with real paths (e.g. /private/var/... on macOS).
    let root = fs::canonicalize(&root).map_err(|e| io_err(&root, e))?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    tracing::info!(root = %root.display(), "watching folder");

    let mut gate = PauseGate::default();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            changed = pause_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let paused = *pause_rx.borrow_and_update();
                if gate.set_paused(paused) {
                    tracing::debug!("changes arrived during the last run; rescheduling");
                    schedule_watcher_run(&scheduler, &sync_tx);
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                let Some(path) = event.paths.iter().find(|path| should_schedule(path, &root, &rules)) else {
                    continue;
                };
                if !gate.admit() {
                    tracing::debug!(path = %path.display(), "change during run; held until it ends");
                    continue;
                }
                tracing::debug!(path = %path.display(), "change detected; rescheduling run");
                schedule_watcher_run(&scheduler, &sync_tx);
            }
        }
    }

    Ok(())
}

fn schedule_watcher_run(scheduler: &DebounceScheduler, sync_tx: &mpsc::Sender<SyncJob>) {
    let sync_tx = sync_tx.clone();
    scheduler.submit(async move {
        let _ = sync_tx
            .send(SyncJob {
                source: "watcher",
                respond_to: None,
            })
            .await;
    });
}

/// Holds back scheduling while a run is in progress. A change seen in the
/// meantime may not be part of that run, so one more run is owed once it
/// ends.
#[derive(Debug, Default)]
struct PauseGate {
    paused: bool,
    missed: bool,
}

impl PauseGate {
    /// Returns true when leaving a pause with changes held back.
    fn set_paused(&mut self, paused: bool) -> bool {
        let owed = self.paused && !paused && self.missed;
        if !paused {
            self.missed = false;
        }
        self.paused = paused;
        owed
    }

    /// Whether a relevant change may schedule a run now.
    fn admit(&mut self) -> bool {
        if self.paused {
            self.missed = true;
        }
        !self.paused
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Whether a change at `path` should (re)arm the debounce timer.
///
/// Ignored directories, the quarantine subtree and editor temp files never
/// do. Files must carry an allow-listed extension; directories always count.
fn should_schedule(path: &Path, root: &Path, rules: &PathRules) -> bool {
    let Ok(rel) = path.strip_prefix(root) else {
        return false;
    };
    let rel = rel.to_string_lossy().replace('\\', "/");
    if rel.is_empty() {
        return false;
    }
    let ignored = rel
        .split('/')
        .any(|part| rules.ignored_dir_names().iter().any(|name| name == part));
    if ignored || rules.is_quarantined(&rel) || is_transient_artifact(&rel) {
        return false;
    }
    if path.is_dir() {
        return true;
    }
    // A removed directory has no extension and no longer exists.
    rules.allows_extension(&rel) || (!path.exists() && path.extension().is_none())
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

async fn processor_task(
    context: Arc<DaemonContext>,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    pause_tx: watch::Sender<bool>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();

                let _ = pause_tx.send(true);
                let pipeline = context.pipeline.clone();
                let result = tokio::task::spawn_blocking(move || pipeline.run_with_recovery())
                    .await
                    .map_err(|err| DaemonError::Protocol(format!("pipeline task join error: {err}")));
                let _ = pause_tx.send(false);

                let outcome = match result? {
                    Ok(outcome) => {
                        let summary = RunSummary::from_outcome(job.source, &outcome, started.elapsed());
                        tracing::info!(
                            source = job.source,
                            duration_ms = summary.duration_ms,
                            "{}",
                            summary.outcome,
                        );
                        Ok(summary)
                    }
                    Err(err) => {
                        tracing::error!(source = job.source, error = %err, "pipeline run failed");
                        Err(err.to_string())
                    }
                };

                record_run(&context, &outcome).await;
                if let Some(respond_to) = job.respond_to {
                    let _ = respond_to.send(outcome);
                }
            }
        }
    }

    Ok(())
}

async fn record_run(context: &DaemonContext, outcome: &Result<RunSummary, String>) {
    let mut history = context.history.write().await;
    history.runs += 1;
    match outcome {
        Ok(summary) => {
            history.last_run = Some(summary.clone());
        }
        Err(err) => {
            history.failures += 1;
            history.last_error = Some(err.clone());
        }
    }
}

async fn enqueue_sync(
    sync_tx: &mpsc::Sender<SyncJob>,
    source: &'static str,
) -> Result<RunSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob {
            source,
            respond_to: Some(tx),
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))?;
    outcome.map_err(DaemonError::Protocol)
}

// ---------------------------------------------------------------------------
// Control socket
// ---------------------------------------------------------------------------

async fn socket_server_task(
    context: Arc<DaemonContext>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = paths::socket_path(&context.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::debug!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let context = context.clone();
                let sync_tx = sync_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, context, sync_tx, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    context: Arc<DaemonContext>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => DaemonResponse::ok(build_status_payload(&context).await),
            "sync" => {
                // An immediate run supersedes the pending debounced one.
                context.scheduler.cancel();
                match enqueue_sync(&sync_tx, "socket").await {
                    Ok(summary) => DaemonResponse::ok(json!(summary)),
                    Err(err) => DaemonResponse::error(err.to_string()),
                }
            }
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(context: &DaemonContext) -> Value {
    let config = context.pipeline.config();
    let history = context.history.read().await;
    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at_unix": context.started_at_unix,
        "repo": config.slug(),
        "branch": config.branch,
        "watched_root": config.watched_root.display().to_string(),
        "debounce_seconds": config.debounce_seconds,
        "pending": context.scheduler.is_pending(),
        "pushing": context.pipeline.is_running(),
        "runs": history.runs,
        "failures": history.failures,
        "last_run": history.last_run,
        "last_error": history.last_error,
        "socket": paths::socket_path(&context.home).display().to_string(),
    })
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    writer
        .write_all(&payload)
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let run = paths::run_dir(home);
    fs::create_dir_all(&run).map_err(|e| io_err(&run, e))
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the fmt subscriber (`RUST_LOG`, default `info`). Records from the
/// library crates' `log` macros are bridged in as well.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use autosync_core::SyncConfig;
    use autosync_remote::{MemoryRemote, Operation, RetryPolicy};
    use tempfile::TempDir;

    fn rules() -> PathRules {
        PathRules::new(
            vec![".md".into(), ".json".into()],
            vec![".obsidian".into(), ".git".into()],
            "deleted_files",
        )
    }

    #[test]
    fn allow_listed_file_changes_schedule_a_run() {
        let root = TempDir::new().expect("root");
        fs::write(root.path().join("note.md"), "x").unwrap();
        assert!(should_schedule(&root.path().join("note.md"), root.path(), &rules()));
        // Deleted files are judged by name alone.
        assert!(should_schedule(&root.path().join("gone.json"), root.path(), &rules()));
    }

    #[test]
    fn noise_does_not_schedule() {
        let root = TempDir::new().expect("root");
        let r = root.path();
        fs::write(r.join("image.png"), "x").unwrap();
        for path in [
            r.join("image.png"),
            r.join(".obsidian/workspace.json"),
            r.join(".git"),
            r.join("deleted_files/notes_a.md"),
            r.join("note.md.tmp"),
            r.to_path_buf(),
            PathBuf::from("/elsewhere/note.md"),
        ] {
            assert!(!should_schedule(&path, r, &rules()), "{}", path.display());
        }
    }

    #[test]
    fn directories_schedule_regardless_of_extension() {
        let root = TempDir::new().expect("root");
        fs::create_dir_all(root.path().join("notes.v2")).unwrap();
        assert!(should_schedule(&root.path().join("notes.v2"), root.path(), &rules()));
        assert!(should_schedule(&root.path().join("removed_dir"), root.path(), &rules()));
    }

    #[test]
    fn access_events_are_ignored() {
        use notify::event::{AccessKind, CreateKind, RemoveKind};
        assert!(is_relevant_event_kind(&EventKind::Create(CreateKind::File)));
        assert!(is_relevant_event_kind(&EventKind::Remove(RemoveKind::File)));
        assert!(!is_relevant_event_kind(&EventKind::Access(AccessKind::Any)));
    }

    #[test]
    fn changes_during_a_run_are_owed_a_run() {
        let mut gate = PauseGate::default();
        assert!(gate.admit());

        assert!(!gate.set_paused(true));
        assert!(!gate.admit());
        assert!(!gate.admit());
        assert!(gate.set_paused(false), "held change must be rescheduled");

        // Nothing held back this time.
        assert!(!gate.set_paused(true));
        assert!(!gate.set_paused(false));
        assert!(gate.admit());
    }

    fn memory_pipeline(home: &TempDir, root: &TempDir) -> (Arc<MemoryRemote>, Arc<Pipeline>) {
        let mut config = SyncConfig::new("octo", "notes", "token", root.path().to_path_buf());
        config.comment_delay_seconds = 0;
        config.recovery.delay_seconds = 0;
        let remote = Arc::new(MemoryRemote::new());
        let pipeline = Pipeline::new(config, remote.clone(), home.path())
            .with_retry(RetryPolicy::immediate(1));
        (remote, Arc::new(pipeline))
    }

    #[tokio::test]
    async fn status_payload_before_any_run() {
        let home = TempDir::new().expect("home");
        let root = TempDir::new().expect("root");
        let (_remote, pipeline) = memory_pipeline(&home, &root);
        let context = DaemonContext {
            home: home.path().to_path_buf(),
            scheduler: Arc::new(DebounceScheduler::new(pipeline.config().debounce())),
            pipeline,
            history: RwLock::new(RunHistory::default()),
            started_at_unix: 1_000_000,
        };

        let payload = build_status_payload(&context).await;
        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["repo"], json!("octo/notes"));
        assert_eq!(payload["started_at_unix"], json!(1_000_000u64));
        assert_eq!(payload["runs"], json!(0u64));
        assert_eq!(payload["pending"], json!(false));
        assert!(payload["last_run"].is_null());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn socket_sync_then_stop() {
        let home = TempDir::new().expect("home");
        let root = TempDir::new().expect("root");
        fs::write(root.path().join("a.md"), "# a\n").unwrap();
        let (remote, pipeline) = memory_pipeline(&home, &root);

        let daemon = tokio::spawn(serve(home.path().to_path_buf(), pipeline));

        let home_path = home.path().to_path_buf();
        let (status, summary) = tokio::task::spawn_blocking(move || {
            let socket = paths::socket_path(&home_path);
            for _ in 0..50 {
                if socket.exists() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            let summary = crate::protocol::request_sync(&home_path).expect("sync");
            let status = crate::protocol::request_status(&home_path).expect("status");
            crate::protocol::request_stop(&home_path).expect("stop");
            (status, summary)
        })
        .await
        .expect("client thread");

        assert_eq!(summary["pushed"], json!(true));
        assert_eq!(summary["source"], json!("socket"));
        assert_eq!(status["runs"], json!(1u64));
        assert_eq!(remote.branch_files("main")["a.md"], b"# a\n");

        daemon.await.expect("daemon task").expect("daemon result");
        assert!(!paths::socket_path(home.path()).exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn file_written_mid_run_is_pushed_afterwards() {
        let home = TempDir::new().expect("home");
        let root = TempDir::new().expect("root");
        fs::write(root.path().join("a.md"), "# a\n").unwrap();
        let mut config = SyncConfig::new("octo", "notes", "token", root.path().to_path_buf());
        config.comment_delay_seconds = 0;
        config.recovery.delay_seconds = 0;
        config.debounce_seconds = 0;
        let remote = Arc::new(MemoryRemote::new());
        let pipeline = Arc::new(
            Pipeline::new(config, remote.clone(), home.path()).with_retry(RetryPolicy::immediate(1)),
        );

        // Lands after the local scan of the first run.
        let late = root.path().join("b.md");
        remote.before_next(Operation::CreateTree, move |_| {
            fs::write(&late, "# b\n").unwrap();
        });

        let daemon = tokio::spawn(serve(home.path().to_path_buf(), pipeline));

        let home_path = home.path().to_path_buf();
        let watched = remote.clone();
        let (first, files) = tokio::task::spawn_blocking(move || {
            let socket = paths::socket_path(&home_path);
            for _ in 0..50 {
                if socket.exists() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            // Give the watcher time to register.
            std::thread::sleep(Duration::from_millis(200));
            let first = crate::protocol::request_sync(&home_path).expect("sync");
            let mut files = watched.branch_files("main");
            for _ in 0..100 {
                if files.contains_key("b.md") {
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
                files = watched.branch_files("main");
            }
            crate::protocol::request_stop(&home_path).expect("stop");
            (first, files)
        })
        .await
        .expect("client thread");

        assert_eq!(first["pushed"], json!(true));
        assert_eq!(files["a.md"], b"# a\n");
        assert_eq!(files.get("b.md").map(Vec::as_slice), Some(b"# b\n".as_slice()));

        daemon.await.expect("daemon task").expect("daemon result");
    }
}
