//! Daemon runtime: event ingest + poll driver + reconcile processor.
//!
//! Task topology:
//! - a socket server accepting control requests AND forwarded webhook
//!   envelopes (the event-driven path),
//! - an interval driver enqueuing one board poll per tick (the
//!   interval-driven path),
//! - a single reconcile processor consuming both kinds of job sequentially,
//!   which is what serializes link store writes and preserves per-pair
//!   ordering,
//! - a log-rotation tick and a ctrl-c handler.
//!
//! Every task owns a shutdown broadcast receiver; the first task to exit
//! (or a ctrl-c) tears the rest down.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};

use taskbridge_core::config::Config;
use taskbridge_core::link_store::LinkStore;
use taskbridge_sync::{
    BoardClient, ChatClient, ChatEvent, NotificationSink, PassSummary, SyncEngine,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{logs_dir, run_dir, socket_path, DAEMON_LABEL};
use crate::protocol::{DaemonRequest, DaemonResponse};

const LOG_ROTATION_PERIOD: Duration = Duration::from_secs(60);

/// One unit of work for the reconcile processor.
enum JobKind {
    ChatEvent(Box<ChatEvent>),
    Poll,
}

struct ReconcileJob {
    kind: JobKind,
    source: &'static str,
    respond_to: oneshot::Sender<Result<PassSummary, String>>,
}

/// Rolling counters across all passes since daemon start.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RuntimeStats {
    pub last_poll_at_unix: u64,
    pub last_event_at_unix: u64,
    pub written: usize,
    pub unchanged: usize,
    pub tombstoned: usize,
    pub unresolved: usize,
    pub malformed: usize,
    pub errors: usize,
}

impl RuntimeStats {
    fn absorb(&mut self, summary: &PassSummary) {
        self.written += summary.written;
        self.unchanged += summary.unchanged;
        self.tombstoned += summary.tombstoned;
        self.unresolved += summary.unresolved;
        self.malformed += summary.malformed;
        self.errors += summary.errors;
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(
    home: &Path,
    config: Config,
    chat: Arc<dyn ChatClient>,
    board: Arc<dyn BoardClient>,
    sink: Arc<dyn NotificationSink>,
) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config, chat, board, sink))
}

/// Run the daemon runtime.
pub async fn run(
    home: PathBuf,
    config: Config,
    chat: Arc<dyn ChatClient>,
    board: Arc<dyn BoardClient>,
    sink: Arc<dyn NotificationSink>,
) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let engine = Arc::new(SyncEngine::new(&home, &config, chat, board, sink));
    let stats = Arc::new(RwLock::new(RuntimeStats::default()));
    let started_at_unix = unix_seconds_now();
    let poll_interval = Duration::from_secs(config.board.poll_interval_secs.max(1));
    let poll_deadline = Duration::from_secs(config.board.poll_deadline_secs.max(1));

    let (job_tx, job_rx) = mpsc::channel::<ReconcileJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let poll_handle = {
        let shutdown = shutdown_tx.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = poll_driver_task(poll_interval, job_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let engine = engine.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            let result =
                processor_task(engine, poll_deadline, stats, job_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let stats = stats.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                stats,
                job_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(home, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
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

    let (poll_result, processor_result, socket_result, rotation_result, signal_result) = tokio::join!(
        poll_handle,
        processor_handle,
        socket_handle,
        rotation_handle,
        signal_handle
    );

    handle_join("poll_driver", poll_result)?;
    handle_join("processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Enqueue one board poll per tick. Each tick awaits its pass completing, so
/// full scans never overlap; missed ticks are skipped, not bunched.
async fn poll_driver_task(
    interval: Duration,
    job_tx: mpsc::Sender<ReconcileJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                match enqueue_job(&job_tx, JobKind::Poll, "interval").await {
                    Ok(summary) => {
                        if summary.aborted {
                            tracing::warn!(
                                written = summary.written,
                                "poll tick aborted at deadline; continuing next tick",
                            );
                        } else {
                            tracing::info!(
                                written = summary.written,
                                unchanged = summary.unchanged,
                                tombstoned = summary.tombstoned,
                                unresolved = summary.unresolved,
                                "poll tick completed",
                            );
                        }
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "poll tick failed");
                    }
                }
            }
        }
    }

    Ok(())
}

/// The single consumer of reconcile jobs. Passes run under `spawn_blocking`
/// because the engine and its clients are blocking code.
async fn processor_task(
    engine: Arc<SyncEngine>,
    poll_deadline: Duration,
    stats: Arc<RwLock<RuntimeStats>>,
    mut job_rx: mpsc::Receiver<ReconcileJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = job_rx.recv() => {
                let Some(ReconcileJob { kind, source, respond_to }) = maybe_job else { break };
                let engine = engine.clone();
                let is_poll = matches!(kind, JobKind::Poll);

                let pass = tokio::task::spawn_blocking(move || match kind {
                    JobKind::ChatEvent(event) => engine.handle_chat_event(&event),
                    JobKind::Poll => engine.poll_board(Some(Instant::now() + poll_deadline)),
                })
                .await
                .map_err(|err| DaemonError::Protocol(format!("reconcile task join error: {err}")))?;

                let outcome = match pass {
                    Ok(summary) => {
                        let now = unix_seconds_now();
                        let mut stats = stats.write().await;
                        stats.absorb(&summary);
                        if is_poll {
                            stats.last_poll_at_unix = now;
                        } else {
                            stats.last_event_at_unix = now;
                        }
                        drop(stats);
                        Ok(summary)
                    }
                    Err(err) => {
                        tracing::error!(source = source, error = %err, "reconcile pass failed");
                        Err(err.to_string())
                    }
                };

                let _ = respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    stats: Arc<RwLock<RuntimeStats>>,
    job_tx: mpsc::Sender<ReconcileJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let run = run_dir(&home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }

    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let stats = stats.clone();
                let job_tx = job_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        stats,
                        job_tx,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
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
    home: PathBuf,
    stats: Arc<RwLock<RuntimeStats>>,
    job_tx: mpsc::Sender<ReconcileJob>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
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

        let request: Result<DaemonRequest, _> = serde_json::from_str(&line);
        let request = match request {
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

        let cmd = request.cmd.clone();
        let response = match cmd.as_str() {
            "status" => {
                let payload =
                    build_status_payload(&home, stats.clone(), started_at_unix).await;
                DaemonResponse::ok(payload)
            }
            "poll" => match enqueue_job(&job_tx, JobKind::Poll, "socket").await {
                Ok(summary) => DaemonResponse::ok(json!(summary)),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            "event" => match parse_event(request.event) {
                Ok(event) => {
                    match enqueue_job(&job_tx, JobKind::ChatEvent(Box::new(event)), "webhook")
                        .await
                    {
                        Ok(summary) => DaemonResponse::ok(json!(summary)),
                        Err(err) => DaemonResponse::error(err.to_string()),
                    }
                }
                Err(message) => DaemonResponse::error(message),
            },
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if cmd == "stop" {
            break;
        }
    }

    Ok(())
}

fn parse_event(event: Option<Value>) -> Result<ChatEvent, String> {
    let Some(value) = event else {
        return Err("event command requires an 'event' payload".to_string());
    };
    serde_json::from_value(value).map_err(|err| format!("invalid event payload: {err}"))
}

async fn build_status_payload(
    home: &Path,
    stats: Arc<RwLock<RuntimeStats>>,
    started_at_unix: u64,
) -> Value {
    let snapshot = { stats.read().await.clone() };

    // Link counts come from disk so status reflects durable state.
    let home_for_store = home.to_path_buf();
    let (links, tombstoned) = tokio::task::spawn_blocking(move || {
        match LinkStore::load_at(&home_for_store) {
            Ok(store) => (store.len(), store.tombstoned_count()),
            Err(err) => {
                tracing::warn!(error = %err, "status could not read link store");
                (0, 0)
            }
        }
    })
    .await
    .unwrap_or((0, 0));

    json!({
        "running": true,
        "label": DAEMON_LABEL,
        "started_at_unix": started_at_unix,
        "last_poll_at_unix": snapshot.last_poll_at_unix,
        "last_event_at_unix": snapshot.last_event_at_unix,
        "links": links,
        "tombstoned": tombstoned,
        "counters": {
            "written": snapshot.written,
            "unchanged": snapshot.unchanged,
            "tombstoned": snapshot.tombstoned,
            "unresolved": snapshot.unresolved,
            "malformed": snapshot.malformed,
            "errors": snapshot.errors,
        },
        "socket": socket_path(home).display().to_string(),
        "store": taskbridge_core::link_store::store_path_at(home).display().to_string(),
    })
}

async fn enqueue_job(
    job_tx: &mpsc::Sender<ReconcileJob>,
    kind: JobKind,
    source: &'static str,
) -> Result<PassSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    job_tx
        .send(ReconcileJob {
            kind,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("reconcile queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("reconcile response"))?;
    outcome.map_err(DaemonError::Protocol)
}

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(LOG_ROTATION_PERIOD);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // consume the first immediate tick

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_daemon_logs(&home);
                })
                .await
                .ok(); // rotation errors are logged inside; never crash the daemon
            }
        }
    }
    Ok(())
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [crate::paths::bridge_root(home), run_dir(home), logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

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

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
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

fn init_tracing() {
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
    use serde_json::json;
    use taskbridge_core::types::ChatTaskId;
    use tempfile::TempDir;
    use tokio::sync::{broadcast, mpsc, RwLock};

    #[tokio::test]
    async fn socket_protocol_status_and_stop_over_in_memory_channels() {
        let (request_tx, mut request_rx) = mpsc::channel::<Vec<u8>>(8);
        let (response_tx, mut response_rx) = mpsc::channel::<Vec<u8>>(8);
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        tokio::spawn(async move {
            while let Some(bytes) = request_rx.recv().await {
                let line = String::from_utf8(bytes).expect("utf8");
                let request: DaemonRequest = serde_json::from_str(line.trim()).expect("request");
                let response = match request.cmd.as_str() {
                    "status" => DaemonResponse::ok(json!({"running": true})),
                    "stop" => {
                        let _ = shutdown_tx.send(());
                        DaemonResponse::ok(json!({"stopping": true}))
                    }
                    other => DaemonResponse::error(format!("unknown command '{other}'")),
                };
                let encoded = serde_json::to_vec(&response).expect("encode response");
                if response_tx.send(encoded).await.is_err() {
                    break;
                }
            }
        });

        request_tx
            .send(br#"{"cmd":"status"}"#.to_vec())
            .await
            .expect("send status request");
        let status_response = response_rx.recv().await.expect("status response");
        let status_json: serde_json::Value =
            serde_json::from_slice(&status_response).expect("decode status");
        assert_eq!(status_json["ok"], serde_json::Value::Bool(true));

        request_tx
            .send(br#"{"cmd":"stop"}"#.to_vec())
            .await
            .expect("send stop request");
        let stop_response = response_rx.recv().await.expect("stop response");
        let stop_json: serde_json::Value =
            serde_json::from_slice(&stop_response).expect("decode stop");
        assert_eq!(stop_json["ok"], serde_json::Value::Bool(true));

        shutdown_rx.recv().await.expect("shutdown signal");
    }

    #[tokio::test]
    async fn status_payload_before_any_pass_reports_zeros() {
        let home = TempDir::new().expect("home");
        let stats = Arc::new(RwLock::new(RuntimeStats::default()));

        let payload = build_status_payload(home.path(), stats, 1_000_000).await;

        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["started_at_unix"], json!(1_000_000u64));
        assert_eq!(payload["last_poll_at_unix"], json!(0u64));
        assert_eq!(payload["links"], json!(0));
        assert_eq!(payload["counters"]["written"], json!(0));
    }

    #[tokio::test]
    async fn status_payload_reflects_durable_links_and_counters() {
        let home = TempDir::new().expect("home");

        let mut store = LinkStore::empty();
        let id = store
            .ensure_link(Some(&ChatTaskId::from("A1")), None)
            .id();
        store.ensure_link(Some(&ChatTaskId::from("A2")), None);
        store.mark_tombstoned(id);
        store.save_at(home.path()).expect("save");

        let mut runtime_stats = RuntimeStats::default();
        runtime_stats.absorb(&PassSummary {
            written: 3,
            unchanged: 5,
            tombstoned: 1,
            ..PassSummary::default()
        });
        runtime_stats.last_poll_at_unix = 1_000_100;
        let stats = Arc::new(RwLock::new(runtime_stats));

        let payload = build_status_payload(home.path(), stats, 1_000_000).await;

        assert_eq!(payload["links"], json!(2));
        assert_eq!(payload["tombstoned"], json!(1));
        assert_eq!(payload["last_poll_at_unix"], json!(1_000_100u64));
        assert_eq!(payload["counters"]["written"], json!(3));
        assert_eq!(payload["counters"]["unchanged"], json!(5));
    }

    #[test]
    fn stats_absorb_accumulates_across_passes() {
        let mut stats = RuntimeStats::default();
        let pass = PassSummary {
            written: 2,
            unchanged: 1,
            unresolved: 1,
            ..PassSummary::default()
        };
        stats.absorb(&pass);
        stats.absorb(&pass);
        assert_eq!(stats.written, 4);
        assert_eq!(stats.unchanged, 2);
        assert_eq!(stats.unresolved, 2);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn poll_driver_enqueues_ticks_and_stops_on_shutdown() {
        let (job_tx, mut job_rx) = mpsc::channel::<ReconcileJob>(4);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let driver = tokio::spawn(poll_driver_task(
            Duration::from_secs(60),
            job_tx,
            shutdown_tx.subscribe(),
        ));

        // Stand-in processor: answer each poll immediately, stop after three.
        let consumer = tokio::spawn(async move {
            let mut count = 0usize;
            while let Some(job) = job_rx.recv().await {
                assert!(matches!(job.kind, JobKind::Poll));
                count += 1;
                let _ = job.respond_to.send(Ok(PassSummary::default()));
                if count == 3 {
                    break;
                }
            }
            count
        });

        let count = consumer.await.expect("consumer");
        assert_eq!(count, 3, "one poll job per tick");

        let _ = shutdown_tx.send(());
        driver.await.expect("join").expect("driver exits cleanly");
    }

    #[test]
    fn parse_event_requires_payload() {
        assert!(parse_event(None).is_err());
        let event = parse_event(Some(json!({
            "eventType": "task_created",
            "taskData": {"taskId": "A1"}
        })))
        .expect("lenient envelope parse");
        assert_eq!(event.event_type.as_deref(), Some("task_created"));
    }
}
