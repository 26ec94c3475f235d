//! Daemon startup sequence (§4.6 "Autostart", §6.3 daemon subprocess args):
//! wires every backend, binds the listener, writes `engine.json`, and serves
//! until the idle ticker or a signal asks for graceful shutdown.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use std::time::Duration;

use sqlrs_adapters::{ConnTracker, DockerRuntime, RuntimeConnTracker, RuntimeLiquibaseRunner, RuntimePsqlRunner};
use sqlrs_core::engine_state;
use sqlrs_core::id::{IdGen, UuidIdGen};
use sqlrs_core::proto::EngineState;
use sqlrs_engine::{Config, DeletionPlanner, PrepareCoordinator, Runner};
use sqlrs_statefs::{BtrfsStateFs, CopyStateFs, OverlayStateFs, StateFs};
use sqlrs_storage::Catalog;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::AppState;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("catalog error: {0}")]
    Catalog(#[from] sqlrs_storage::CatalogError),
    #[error("config error: {0}")]
    Config(#[from] sqlrs_engine::ConfigError),
    #[error("wsl mount precondition failed: {0}")]
    WslMount(#[from] crate::wsl::WslMountError),
    #[error("engine.json write failed: {0}")]
    EngineState(#[from] sqlrs_core::engine_state::EngineStateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct DaemonArgs {
    pub listen: SocketAddr,
    pub run_dir: PathBuf,
    pub state_store_root: PathBuf,
    pub write_engine_json: Option<PathBuf>,
    pub idle_timeout: Option<Duration>,
    pub version: String,
}

/// Wires Catalog/StateFS/Runtime/Coordinators, binds `args.listen`, writes
/// `engine.json`, and serves until the idle ticker (or a caller-issued
/// shutdown, in tests) fires. Returns once the server has shut down.
pub async fn run(args: DaemonArgs) -> Result<(), StartupError> {
    std::fs::create_dir_all(&args.run_dir)?;
    crate::wsl::ensure_mounted(&args.state_store_root).await?;

    let catalog = Arc::new(Catalog::open(&args.state_store_root)?);
    let config = Arc::new(Config::open(&args.state_store_root)?);

    let backend = config.get("statefs.backend", true)?;
    let statefs = build_statefs(backend.as_str().unwrap_or("copy"));

    let runtime = Arc::new(DockerRuntime::new());
    let psql = Arc::new(RuntimePsqlRunner::new(runtime.clone()));
    let liquibase = Arc::new(RuntimeLiquibaseRunner::new(runtime.clone()));
    let conn_tracker: Arc<dyn ConnTracker> = Arc::new(RuntimeConnTracker::new(runtime.clone()));
    let id_gen = Arc::new(UuidIdGen);

    let synchronous = config.get("prepare.synchronous", true)?.as_bool().unwrap_or(false);
    let prepare = Arc::new(PrepareCoordinator::new(
        catalog.clone(),
        statefs.clone(),
        runtime.clone(),
        psql,
        liquibase,
        conn_tracker.clone(),
        id_gen,
        args.state_store_root.clone(),
        synchronous,
    ));
    let deletion = Arc::new(DeletionPlanner::new(catalog.clone(), statefs, conn_tracker.clone(), args.state_store_root.clone()));
    let runner = Arc::new(Runner::new(catalog.clone(), runtime));

    let listener = TcpListener::bind(args.listen).await?;
    let bound_addr = listener.local_addr()?;

    let instance_id = UuidIdGen.next_id();
    let auth_token = UuidIdGen.next_id();

    let state = AppState {
        catalog,
        prepare,
        deletion,
        runner,
        config,
        conn_tracker,
        auth_token,
        instance_id: instance_id.clone(),
        version: args.version.clone(),
        pid: std::process::id(),
        last_activity_ms: Arc::new(AtomicI64::new(chrono::Utc::now().timestamp_millis())),
    };

    if let Some(engine_json_path) = &args.write_engine_json {
        write_engine_state(engine_json_path, &bound_addr, &state)?;
    }

    info!(%bound_addr, instance_id = %instance_id, "daemon listening");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(());
    shutdown_rx.borrow_and_update();
    let idle_handle = tokio::spawn(crate::idle::run(state.clone(), args.idle_timeout, shutdown_tx));

    let router = crate::http::router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    let _ = idle_handle.await;
    if let Some(engine_json_path) = &args.write_engine_json {
        if let Some(run_dir) = engine_json_path.parent() {
            engine_state::remove(run_dir);
        }
    }
    Ok(())
}

fn write_engine_state(engine_json_path: &Path, bound_addr: &SocketAddr, state: &AppState) -> Result<(), StartupError> {
    let run_dir = engine_json_path.parent().unwrap_or_else(|| Path::new("."));
    let engine_state = EngineState {
        endpoint: bound_addr.to_string(),
        pid: state.pid,
        started_at: chrono::Utc::now(),
        auth_token: state.auth_token.clone(),
        version: state.version.clone(),
        instance_id: state.instance_id.clone(),
    };
    engine_state::write(run_dir, &engine_state)?;
    Ok(())
}

fn build_statefs(backend: &str) -> Arc<dyn StateFs> {
    match backend {
        "btrfs" => Arc::new(BtrfsStateFs::new()),
        "overlay" => Arc::new(OverlayStateFs::new()),
        _ => Arc::new(CopyStateFs::new()),
    }
}
