use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::time::Instant;

use ordinal_core::{
    config, store, Capability, CollectionName, FileStore, OrderStore, OrdinalConfig, RecordId,
};
use ordinal_sync::{
    pipeline::{self, MaintenanceScope},
    MigrationGate, MigrationOutcome, Pass, ReorderService,
};

use crate::auth::authorize;
use crate::error::{io_err, DaemonError};
use crate::paths::{ordinal_root, socket_path};
use crate::protocol::{
    parse_ordered_ids, ListItem, OrdinalRequest, OrdinalResponse, SaveOrderData,
};
use crate::rate_limit::RateLimiter;

/// Per-collection last-maintenance timestamps (Unix seconds).
pub type MaintenanceTimestamps = HashMap<String, u64>;

/// Work that writes to a store. Processed one at a time.
#[derive(Debug)]
enum JobKind {
    SaveOrder {
        collection: CollectionName,
        ids: Vec<RecordId>,
    },
    Migrate {
        collection: CollectionName,
    },
    Maintenance {
        ttl: Duration,
    },
}

impl JobKind {
    fn label(&self) -> &'static str {
        match self {
            JobKind::SaveOrder { .. } => "save_order",
            JobKind::Migrate { .. } => "migrate",
            JobKind::Maintenance { .. } => "maintenance",
        }
    }
}

enum JobOutput {
    Saved(SaveOrderData),
    Migrated(MigrationOutcome),
    Maintained(Vec<Pass>),
}

/// Runs one job on the blocking pool.
type JobExecutor = fn(&Path, JobKind) -> Result<JobOutput, DaemonError>;

struct Job {
    kind: JobKind,
    respond_to: oneshot::Sender<Result<Value, DaemonError>>,
}

/// State shared by every socket client.
#[derive(Clone)]
struct Shared {
    home: PathBuf,
    config: Arc<OrdinalConfig>,
    limiter: Arc<Mutex<RateLimiter>>,
    timestamps: Arc<RwLock<MaintenanceTimestamps>>,
    jobs: mpsc::Sender<Job>,
    shutdown: broadcast::Sender<()>,
    started_at_unix: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let config = config::load_at(&home)?;
    let interval = config.maintenance.interval();
    let ttl = config.maintenance.sync_ttl();

    let (job_tx, job_rx) = mpsc::channel::<Job>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let timestamps: Arc<RwLock<MaintenanceTimestamps>> = Arc::new(RwLock::new(HashMap::new()));

    let shared = Shared {
        home: home.clone(),
        limiter: Arc::new(Mutex::new(RateLimiter::from_config(&config.rate_limit))),
        config: Arc::new(config),
        timestamps: timestamps.clone(),
        jobs: job_tx.clone(),
        shutdown: shutdown_tx.clone(),
        started_at_unix: unix_seconds_now(),
    };

    tracing::info!(
        home = %home.display(),
        tokens = shared.config.tokens.len(),
        interval_secs = interval.as_secs(),
        "starting ordinal daemon",
    );

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let home = home.clone();
        tokio::spawn(async move {
            let result =
                job_processor_task(home, timestamps, job_rx, shutdown_rx, execute_job).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let shared = shared.clone();
        tokio::spawn(async move {
            let result = socket_server_task(shared, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let maintenance_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let jobs = job_tx.clone();
        tokio::spawn(async move {
            let result = maintenance_task(jobs, interval, ttl, shutdown_rx).await;
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

    drop(shared);
    drop(job_tx);

    let (processor_result, socket_result, maintenance_result, signal_result) = tokio::join!(
        processor_handle,
        socket_handle,
        maintenance_handle,
        signal_handle
    );

    handle_join("job_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("maintenance", maintenance_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("ordinal daemon stopped");
    Ok(())
}

async fn job_processor_task(
    home: PathBuf,
    timestamps: Arc<RwLock<MaintenanceTimestamps>>,
    mut jobs: mpsc::Receiver<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
    execute: JobExecutor,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = jobs.recv() => {
                let Some(job) = maybe_job else { break };
                let label = job.kind.label();
                let started = Instant::now();
                let home_for_job = home.clone();
                let kind = job.kind;
                // A panicking job fails only its own request.
                let result = match tokio::task::spawn_blocking(move || execute(&home_for_job, kind)).await {
                    Ok(result) => result,
                    Err(err) => {
                        tracing::error!(job = label, error = %err, "job aborted");
                        Err(DaemonError::JobAborted {
                            job: label,
                            reason: err.to_string(),
                        })
                    }
                };

                let outcome = match result {
                    Ok(JobOutput::Saved(data)) => serde_json::to_value(data).map_err(DaemonError::from),
                    Ok(JobOutput::Migrated(outcome)) => serde_json::to_value(outcome).map_err(DaemonError::from),
                    Ok(JobOutput::Maintained(passes)) => {
                        let now = unix_seconds_now();
                        let mut ts = timestamps.write().await;
                        for pass in &passes {
                            ts.insert(pass.collection.clone(), now);
                        }
                        drop(ts);
                        Ok(maintenance_summary(&passes))
                    }
                    Err(err) => Err(err),
                };
                tracing::debug!(
                    job = label,
                    ok = outcome.is_ok(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "job finished",
                );

                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

fn save_order<S: OrderStore + ?Sized>(store: &S, ids: &[RecordId]) -> Result<JobOutput, DaemonError> {
    let outcome = ReorderService::new(store).save_order(ids)?;
    Ok(JobOutput::Saved(SaveOrderData::from(&outcome)))
}

fn execute_job(home: &Path, kind: JobKind) -> Result<JobOutput, DaemonError> {
    match kind {
        JobKind::SaveOrder { collection, ids } => {
            save_order(&FileStore::open_at(home, &collection)?, &ids)
        }
        JobKind::Migrate { collection } => {
            let store = FileStore::open_at(home, &collection)?;
            let outcome = MigrationGate::new(home, &store).run()?;
            Ok(JobOutput::Migrated(outcome))
        }
        JobKind::Maintenance { ttl } => {
            let passes = pipeline::run_if_due(home, MaintenanceScope::All, Utc::now(), ttl)?;
            for pass in passes.iter().filter(|p| p.committed) {
                let fingerprint = FileStore::open_at(home, &CollectionName::from(pass.collection.as_str()))
                    .and_then(|opened| opened.load())
                    .map(|c| store::order_fingerprint(&c))
                    .unwrap_or_default();
                tracing::info!(
                    collection = %pass.collection,
                    revision = pass.revision,
                    reconciled = pass.counts.reconciled,
                    deduplicated = pass.counts.deduplicated,
                    fingerprint = %fingerprint,
                    "maintenance pass committed",
                );
            }
            Ok(JobOutput::Maintained(passes))
        }
    }
}

fn maintenance_summary(passes: &[Pass]) -> Value {
    let collections: Vec<&str> = passes.iter().map(|p| p.collection.as_str()).collect();
    let changed: usize = passes.iter().map(|p| p.changes.len()).sum();
    json!({ "collections": collections, "changed": changed })
}

async fn maintenance_task(
    jobs: mpsc::Sender<Job>,
    every: Duration,
    ttl: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                // Failures are retried on the next tick; they never stop the daemon.
                match enqueue(&jobs, JobKind::Maintenance { ttl }).await {
                    Ok(summary) => tracing::debug!(summary = %summary, "maintenance tick"),
                    Err(DaemonError::ChannelClosed(_)) => break,
                    Err(err) => tracing::error!(error = %err, "maintenance tick failed"),
                }
            }
        }
    }
    Ok(())
}

async fn socket_server_task(
    shared: Shared,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&shared.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, shared).await {
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

async fn handle_socket_client(stream: UnixStream, shared: Shared) -> Result<(), DaemonError> {
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

        let request: OrdinalRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &OrdinalResponse::error(400, format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == "stop";
        let response = dispatch(&shared, request).await;
        let stopping = stop && response.ok;
        write_response(&mut writer, &response).await?;
        if stopping {
            break;
        }
    }

    Ok(())
}

/// Handle one request and turn any failure into an error response.
async fn dispatch(shared: &Shared, request: OrdinalRequest) -> OrdinalResponse {
    let cmd = request.cmd.clone();
    match handle_command(shared, request).await {
        Ok(data) => OrdinalResponse::ok(data),
        Err(err) => {
            let response = OrdinalResponse::from_error(&err);
            if response.code >= 500 {
                tracing::error!(cmd = %cmd, error = %err, "request failed");
            } else {
                tracing::warn!(cmd = %cmd, code = response.code, error = %err, "request rejected");
            }
            response
        }
    }
}

async fn handle_command(shared: &Shared, request: OrdinalRequest) -> Result<Value, DaemonError> {
    let token = request.token.as_deref();
    match request.cmd.as_str() {
        "status" => Ok(build_status_payload(&shared.home, &shared.timestamps, shared.started_at_unix).await),
        "list" => {
            let grant = authorize(&shared.config, token, Capability::EditRecords)?;
            let collection = require_collection(&request)?;
            tracing::info!(caller = %grant.caller, collection = %collection, "list");
            let home = shared.home.clone();
            let items = tokio::task::spawn_blocking(move || list_records(&home, &collection))
                .await
                .map_err(|err| DaemonError::Protocol(format!("list join error: {err}")))??;
            Ok(serde_json::to_value(items)?)
        }
        "save_order" => {
            let grant = authorize(&shared.config, token, Capability::EditRecords)?;
            shared.limiter.lock().await.check(&grant.caller, Instant::now())?;
            let collection = require_collection(&request)?;
            let ids = parse_ordered_ids(request.ordered_ids.as_ref())?;
            tracing::info!(
                caller = %grant.caller,
                collection = %collection,
                requested = ids.len(),
                "save_order",
            );
            enqueue(&shared.jobs, JobKind::SaveOrder { collection, ids }).await
        }
        "migrate" => {
            let grant = authorize(&shared.config, token, Capability::Administer)?;
            let collection = require_collection(&request)?;
            tracing::info!(caller = %grant.caller, collection = %collection, "migrate");
            enqueue(&shared.jobs, JobKind::Migrate { collection }).await
        }
        "stop" => {
            let grant = authorize(&shared.config, token, Capability::Administer)?;
            tracing::info!(caller = %grant.caller, "stop requested");
            let _ = shared.shutdown.send(());
            Ok(json!({ "stopping": true }))
        }
        other => Err(DaemonError::Validation(format!("unknown command '{other}'"))),
    }
}

fn require_collection(request: &OrdinalRequest) -> Result<CollectionName, DaemonError> {
    match request.collection.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Ok(CollectionName::from(name)),
        _ => Err(DaemonError::Validation("collection is required".to_string())),
    }
}

fn list_records(home: &Path, collection: &CollectionName) -> Result<Vec<ListItem>, DaemonError> {
    let store = FileStore::open_at(home, collection)?;
    let records = ReorderService::new(&store).listing()?;
    Ok(records.iter().map(ListItem::from).collect())
}

async fn build_status_payload(
    home: &Path,
    timestamps: &RwLock<MaintenanceTimestamps>,
    started_at_unix: u64,
) -> Value {
    let ts_snapshot: MaintenanceTimestamps = timestamps.read().await.clone();

    let mut names: Vec<String> = store::list_collections_at(home)
        .unwrap_or_default()
        .into_iter()
        .map(|name| name.0)
        .collect();
    for name in ts_snapshot.keys() {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names.sort();

    let collections: Vec<Value> = names
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "last_maintenance_at_unix": ts_snapshot.get(name).copied().unwrap_or(0),
            })
        })
        .collect();
    let last_maintenance_at_unix = ts_snapshot.values().copied().max().unwrap_or(0);

    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at_unix": started_at_unix,
        "last_maintenance_at_unix": last_maintenance_at_unix,
        "collections": collections,
        "socket": socket_path(home).display().to_string(),
        "root": ordinal_root(home).display().to_string(),
    })
}

async fn enqueue(jobs: &mpsc::Sender<Job>, kind: JobKind) -> Result<Value, DaemonError> {
    let (tx, rx) = oneshot::channel();
    jobs.send(Job {
        kind,
        respond_to: tx,
    })
    .await
    .map_err(|_| DaemonError::ChannelClosed("job queue"))?;

    rx.await
        .map_err(|_| DaemonError::ChannelClosed("job response"))?
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

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let collections = store::collections_dir(home);
    if !collections.exists() {
        fs::create_dir_all(&collections).map_err(|e| io_err(&collections, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &OrdinalResponse,
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

/// `RUST_LOG` filters (default `info`); `ORDINAL_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("ORDINAL_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let _ = if json {
        fmt().json().with_env_filter(filter).with_target(false).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
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
