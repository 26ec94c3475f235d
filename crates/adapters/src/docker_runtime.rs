//! Production [`Runtime`] backend (§4.4): drives the host container engine
//! by shelling out to its CLI binary, the same timeout-wrapped-subprocess
//! idiom StateFS's `btrfs`/`mount`/`cp` backends use rather than a typed
//! client over a socket.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlrs_core::subprocess::{run_with_timeout, SubprocessError};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::runtime::{ExecRequest, Runtime, RuntimeError, RuntimeInstance, StartRequest};

const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);
const START_TIMEOUT: Duration = Duration::from_secs(30);
const EXEC_TIMEOUT: Duration = Duration::from_secs(60);
const STOP_TIMEOUT: Duration = Duration::from_secs(15);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

const CONTAINER_DATA_DIR: &str = "/var/lib/postgresql/data";

impl From<SubprocessError> for RuntimeError {
    fn from(e: SubprocessError) -> Self {
        match &e {
            SubprocessError::NonZeroExit(_, _, stderr) if RuntimeError::looks_like_missing_container(stderr) => {
                RuntimeError::NotFound(stderr.clone())
            }
            _ => RuntimeError::SpawnFailed(e.to_string()),
        }
    }
}

/// Drives `docker` (or a compatible CLI named by `SQLRS_CONTAINER_RUNTIME`,
/// e.g. `podman`) for every `Runtime` operation.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerRuntime {
    /// Resolves the backend binary from `SQLRS_CONTAINER_RUNTIME` (§6.5),
    /// defaulting to `docker`.
    pub fn new() -> Self {
        let binary = std::env::var("SQLRS_CONTAINER_RUNTIME").unwrap_or_else(|_| "docker".to_string());
        DockerRuntime { binary }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        DockerRuntime { binary: binary.into() }
    }

    fn cmd(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd.kill_on_drop(true);
        cmd
    }

    async fn published_port(&self, runtime_id: &str) -> Result<u16, RuntimeError> {
        let cmd = self.cmd(&["port", runtime_id, "5432/tcp"]);
        let out = run_with_timeout(cmd, INSPECT_TIMEOUT, "docker port").await?;
        // Output shape: "0.0.0.0:32768" (one line per binding, IPv4 first).
        let line = out
            .lines()
            .next()
            .ok_or_else(|| RuntimeError::SpawnFailed(format!("no published port for {runtime_id}")))?;
        let port_str = line
            .rsplit(':')
            .next()
            .ok_or_else(|| RuntimeError::SpawnFailed(format!("unparseable port mapping: {line}")))?;
        port_str
            .trim()
            .parse()
            .map_err(|_| RuntimeError::SpawnFailed(format!("unparseable port mapping: {line}")))
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    async fn init_base(&self, image: &str, data_dir: &Path) -> Result<(), RuntimeError> {
        if data_dir.join("PG_VERSION").exists() {
            return Ok(());
        }
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|e| RuntimeError::SpawnFailed(e.to_string()))?;

        let bind = format!("{}:{}", data_dir.display(), CONTAINER_DATA_DIR);
        let cmd = self.cmd(&["run", "--rm", "-v", &bind, "-e", "POSTGRES_PASSWORD=sqlrs", image, "true"]);
        // `postgres` images run initdb as part of their entrypoint before
        // executing the given command; a no-op `true` is enough to trigger
        // first-boot initialization and then exit.
        run_with_timeout(cmd, START_TIMEOUT, "docker run (init_base)").await?;

        if !data_dir.join("PG_VERSION").exists() {
            return Err(RuntimeError::SpawnFailed(format!(
                "init_base completed but {} is missing PG_VERSION",
                data_dir.display()
            )));
        }
        Ok(())
    }

    async fn resolve_image(&self, image: &str) -> Result<String, RuntimeError> {
        // Best-effort: an already-cached image still resolves even if the
        // registry is unreachable, so a pull failure is not fatal here.
        let pull = self.cmd(&["pull", "--quiet", image]);
        if run_with_timeout(pull, START_TIMEOUT, "docker pull").await.is_err() {
            debug!(image, "docker pull failed, resolving from local cache");
        }

        let inspect_digest = self.cmd(&["inspect", "--format", "{{index .RepoDigests 0}}", image]);
        match run_with_timeout(inspect_digest, INSPECT_TIMEOUT, "docker inspect").await {
            Ok(digest) if !digest.trim().is_empty() => Ok(digest.trim().to_string()),
            _ => {
                // Untagged/local-only builds have no repo digest; fall back
                // to the image id, which is still stable across runs.
                let inspect_id = self.cmd(&["inspect", "--format", "{{.Id}}", image]);
                let id = run_with_timeout(inspect_id, INSPECT_TIMEOUT, "docker inspect").await?;
                Ok(format!("{image}@{}", id.trim()))
            }
        }
    }

    async fn start(&self, req: &StartRequest) -> Result<RuntimeInstance, RuntimeError> {
        let bind = format!("{}:{}", req.data_dir, CONTAINER_DATA_DIR);
        let cmd = self.cmd(&[
            "run",
            "-d",
            "--rm",
            "--name",
            &req.name,
            "-v",
            &bind,
            "-e",
            "POSTGRES_PASSWORD=sqlrs",
            "-p",
            "127.0.0.1::5432",
            &req.image,
        ]);
        let stdout = run_with_timeout(cmd, START_TIMEOUT, "docker run").await?;
        let runtime_id = stdout.trim().to_string();
        if runtime_id.is_empty() {
            return Err(RuntimeError::SpawnFailed("docker run produced no container id".into()));
        }
        let port = self.published_port(&runtime_id).await?;
        Ok(RuntimeInstance {
            runtime_id,
            host: "127.0.0.1".to_string(),
            port,
        })
    }

    async fn exec(&self, runtime_id: &str, req: &ExecRequest) -> Result<String, RuntimeError> {
        let mut args = vec!["exec".to_string(), "-i".to_string()];
        if let Some(user) = &req.user {
            args.push("-u".to_string());
            args.push(user.clone());
        }
        args.push(runtime_id.to_string());
        args.extend(req.args.iter().cloned());

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args).kill_on_drop(true);
        if req.stdin.is_some() {
            cmd.stdin(std::process::Stdio::piped());
        }
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| RuntimeError::ExecFailed(e.to_string()))?;
        if let Some(stdin_data) = &req.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(stdin_data.as_bytes())
                    .await
                    .map_err(|e| RuntimeError::ExecFailed(e.to_string()))?;
            }
        }
        let output = tokio::time::timeout(EXEC_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| RuntimeError::ExecFailed(format!("docker exec timed out after {EXEC_TIMEOUT:?}")))?
            .map_err(|e| RuntimeError::ExecFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if RuntimeError::looks_like_missing_container(&stderr) {
                return Err(RuntimeError::NotFound(stderr));
            }
            return Err(RuntimeError::ExecFailed(stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn stop(&self, runtime_id: &str) -> Result<(), RuntimeError> {
        let cmd = self.cmd(&["stop", "--time", "5", runtime_id]);
        match run_with_timeout(cmd, STOP_TIMEOUT, "docker stop").await {
            Ok(_) => Ok(()),
            Err(SubprocessError::NonZeroExit(_, _, stderr)) if RuntimeError::looks_like_missing_container(&stderr) => {
                Ok(())
            }
            Err(e) => {
                warn!(runtime_id, error = %e, "docker stop failed");
                Err(e.into())
            }
        }
    }

    async fn wait_for_ready(&self, runtime_id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let probe = ExecRequest {
                user: Some("postgres".to_string()),
                args: vec!["pg_isready".to_string()],
                stdin: None,
            };
            if self.exec(runtime_id, &probe).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RuntimeError::ReadyTimeout(timeout));
            }
            sleep(READY_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_docker_binary() {
        // SAFETY (test-only): no concurrent access to this env var within
        // this process.
        std::env::remove_var("SQLRS_CONTAINER_RUNTIME");
        assert_eq!(DockerRuntime::new().binary, "docker");
    }

    #[test]
    fn honors_env_override() {
        std::env::set_var("SQLRS_CONTAINER_RUNTIME", "podman");
        assert_eq!(DockerRuntime::new().binary, "podman");
        std::env::remove_var("SQLRS_CONTAINER_RUNTIME");
    }

    #[test]
    fn with_binary_overrides_explicitly() {
        let rt = DockerRuntime::with_binary("podman");
        assert_eq!(rt.binary, "podman");
    }
}
