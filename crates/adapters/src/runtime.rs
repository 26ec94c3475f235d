//! Container runtime adapter (§4.4 "Runtime").
//!
//! Mirrors this crate's session-adapter shape: a capability trait plus a
//! no-op/production split, dynamic dispatch acceptable since every method
//! here is I/O-bound.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("exec failed: {0}")]
    ExecFailed(String),
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("timed out waiting for readiness after {0:?}")]
    ReadyTimeout(Duration),
}

impl RuntimeError {
    /// True for the two `Exec` failure shapes the container-missing
    /// recovery path in §4.4 is written to detect.
    pub fn looks_like_missing_container(message: &str) -> bool {
        message.contains("no such container") || message.contains("is not running")
    }
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub image: String,
    pub data_dir: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct RuntimeInstance {
    pub runtime_id: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub user: Option<String>,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

/// Capability interface over a container runtime (Docker/Podman in
/// production, an in-memory fake in tests).
#[async_trait]
pub trait Runtime: Send + Sync + 'static {
    /// Runs the image's first-boot initialization into an empty
    /// `data_dir`, returning once it contains a recognizable marker file.
    async fn init_base(&self, image: &str, data_dir: &Path) -> Result<(), RuntimeError>;

    /// Resolves `image` to a stable `canonical@digest` form.
    async fn resolve_image(&self, image: &str) -> Result<String, RuntimeError>;

    /// Starts a container bind-mounting `data_dir`, returning once the
    /// container process has started (not once the DB is ready).
    async fn start(&self, req: &StartRequest) -> Result<RuntimeInstance, RuntimeError>;

    async fn exec(&self, runtime_id: &str, req: &ExecRequest) -> Result<String, RuntimeError>;

    /// Idempotent: stopping an already-stopped or missing container
    /// succeeds.
    async fn stop(&self, runtime_id: &str) -> Result<(), RuntimeError>;

    /// Polls a cheap DB probe (`SELECT 1`) until it succeeds or `timeout`
    /// elapses.
    async fn wait_for_ready(&self, runtime_id: &str, timeout: Duration) -> Result<(), RuntimeError>;
}
