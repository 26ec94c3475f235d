#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! The daemon crate: an `axum` translation of the core subsystems onto the
//! HTTP interface in §6.2, plus the orchestrator lifecycle that discovers,
//! autostarts, and idle-shuts-down the process that serves it.

pub mod error;
pub mod http;
pub mod idle;
pub mod startup;
pub mod wsl;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use sqlrs_adapters::ConnTracker;
use sqlrs_engine::{Config, DeletionPlanner, PrepareCoordinator, Runner};
use sqlrs_storage::Catalog;

/// Shared application state wired once at startup and cloned (cheaply, via
/// `Arc`) into every `axum` handler.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub prepare: Arc<PrepareCoordinator>,
    pub deletion: Arc<DeletionPlanner>,
    pub runner: Arc<Runner>,
    pub config: Arc<Config>,
    pub conn_tracker: Arc<dyn ConnTracker>,
    pub auth_token: String,
    pub instance_id: String,
    pub version: String,
    pub pid: u32,
    /// Unix millis of the last serviced request, touched by the auth
    /// middleware on every call; read by the idle ticker (§4.6).
    pub last_activity_ms: Arc<AtomicI64>,
}

impl AppState {
    pub fn touch_activity(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn idle_for_ms(&self) -> i64 {
        now_ms() - self.last_activity_ms.load(Ordering::Relaxed)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
