//! Client-side Orchestrator (§4.6, §5): daemon discovery via `engine.json`,
//! the exclusive `daemon.lock` file, and health-gated autostart. Every
//! subcommand that needs a live daemon routes through [`ensure_daemon`]
//! first (§6.3 "the client performs Orchestrator discovery/autostart
//! transparently").

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use fs2::FileExt;
use sqlrs_core::engine_state;
use sqlrs_core::paths::daemon_lock_path;
use sqlrs_core::proto::HealthResponse;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("engine.json missing or stale")]
    Stale,
    #[error("failed to acquire daemon.lock within {0:?}")]
    LockTimeout(Duration),
    #[error("daemon did not become healthy within {0:?}")]
    StartupTimeout(Duration),
}

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Acquires an exclusive lock on `<run_dir>/daemon.lock`, retrying every
/// 100ms (§5 "Locks") up to `timeout`. The returned `File` holds the lock
/// for its lifetime; drop it to release.
pub async fn acquire_daemon_lock(run_dir: &Path, timeout: Duration) -> Result<File, OrchestratorError> {
    std::fs::create_dir_all(run_dir)?;
    let path = daemon_lock_path(run_dir);
    let file = OpenOptions::new().create(true).write(true).open(&path)?;

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(file),
            Err(_) if tokio::time::Instant::now() < deadline => {
                sleep(LOCK_RETRY_INTERVAL).await;
            }
            Err(_) => return Err(OrchestratorError::LockTimeout(timeout)),
        }
    }
}

/// Reads `engine.json` and probes `/v1/health`, judging staleness per §4.6
/// "Discovery": the health response's `instanceId` must match the file's,
/// and (skipped on Windows, where pid checks are unreliable) the recorded
/// pid must be a live process.
pub async fn discover(
    run_dir: &Path,
    http: &reqwest::Client,
) -> Result<sqlrs_core::proto::EngineState, OrchestratorError> {
    let state = engine_state::read(run_dir).map_err(|_| OrchestratorError::Stale)?;
    let url = format!("http://{}/v1/health", state.endpoint);
    let resp = http
        .get(&url)
        .timeout(Duration::from_millis(connect_timeout_ms()))
        .send()
        .await
        .map_err(|_| OrchestratorError::Stale)?;
    if !resp.status().is_success() {
        return Err(OrchestratorError::Stale);
    }
    let health: HealthResponse = resp.json().await.map_err(|_| OrchestratorError::Stale)?;
    if !health.ok || health.instance_id != state.instance_id {
        return Err(OrchestratorError::Stale);
    }
    if !pid_is_live(state.pid) {
        return Err(OrchestratorError::Stale);
    }
    Ok(state)
}

/// Spawns the `sqlrsd` subprocess detached from the controlling terminal
/// (unless a live daemon is already discovered), then polls `engine.json` +
/// `/v1/health` until healthy or `startup_timeout` elapses (§4.6
/// "Autostart"). Returns the discovered [`EngineState`] either way.
pub async fn ensure_daemon(
    daemon_exe: &Path,
    run_dir: &Path,
    idle_timeout: Option<Duration>,
    startup_timeout: Duration,
    log_path: &Path,
    http: &reqwest::Client,
) -> Result<sqlrs_core::proto::EngineState, OrchestratorError> {
    if let Ok(state) = discover(run_dir, http).await {
        return Ok(state);
    }

    let lock = acquire_daemon_lock(run_dir, startup_timeout).await?;

    // Another process may have started the daemon while we waited on the
    // lock (§4.6 step 2).
    if let Ok(state) = discover(run_dir, http).await {
        drop(lock);
        return Ok(state);
    }

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = OpenOptions::new().create(true).append(true).open(log_path)?;
    let log_file_for_stderr = log_file.try_clone()?;

    let mut cmd = tokio::process::Command::new(daemon_exe);
    cmd.arg("--run-dir")
        .arg(run_dir)
        .arg("--listen")
        .arg("127.0.0.1:0")
        .arg("--write-engine-json")
        .arg(sqlrs_core::paths::engine_json_path(run_dir));
    if let Some(idle) = idle_timeout {
        cmd.arg("--idle-timeout").arg(format!("{}s", idle.as_secs()));
    }
    cmd.stdout(Stdio::from(log_file)).stderr(Stdio::from(log_file_for_stderr));
    detach(&mut cmd);

    let _child = cmd.spawn()?;

    let deadline = tokio::time::Instant::now() + startup_timeout;
    loop {
        if let Ok(state) = discover(run_dir, http).await {
            drop(lock);
            return Ok(state);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(OrchestratorError::StartupTimeout(startup_timeout));
        }
        sleep(POLL_INTERVAL).await;
    }
}

pub fn default_run_dir() -> PathBuf {
    sqlrs_core::paths::state_store_root().join("run")
}

pub fn default_log_path(run_dir: &Path) -> PathBuf {
    sqlrs_core::paths::logs_dir(run_dir).join("engine.log")
}

// This workspace forbids `unsafe_code`, which rules out `CommandExt::pre_exec`
// (the usual way to call `setsid()` before exec on Unix). Detaching relies
// instead on fully redirected stdio and `kill_on_drop(false)` (tokio's
// default): the child is never joined by this process, so it survives the
// CLI exiting even though it remains in the same process group.
#[cfg(unix)]
fn detach(_cmd: &mut tokio::process::Command) {}

#[cfg(not(unix))]
fn detach(cmd: &mut tokio::process::Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x00000008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(unix)]
fn pid_is_live(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(unix))]
fn pid_is_live(_pid: u32) -> bool {
    true
}

fn connect_timeout_ms() -> u64 {
    std::env::var("SQLRS_TIMEOUT_CONNECT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(2_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn discover_fails_without_engine_json() {
        let dir = tempdir().unwrap();
        let http = reqwest::Client::new();
        assert!(discover(dir.path(), &http).await.is_err());
    }

    #[tokio::test]
    async fn lock_is_exclusive_within_process() {
        let dir = tempdir().unwrap();
        let lock = acquire_daemon_lock(dir.path(), Duration::from_millis(50)).await.unwrap();
        let second = acquire_daemon_lock(dir.path(), Duration::from_millis(200)).await;
        assert!(second.is_err());
        drop(lock);
    }
}
