//! Live-connection probe used by the Deletion Planner's
//! `ACTIVE_CONNECTIONS` block (§4.5).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::runtime::{ExecRequest, Runtime};

#[derive(Debug, Error)]
pub enum ConnTrackerError {
    #[error("probe failed: {0}")]
    ProbeFailed(String),
}

#[async_trait]
pub trait ConnTracker: Send + Sync + 'static {
    async fn active_connections(&self, runtime_id: &str) -> Result<u32, ConnTrackerError>;
}

/// Query that counts every backend other than the probe's own connection
/// and the background workers `pg_stat_activity` always lists alongside
/// real clients.
const COUNT_QUERY: &str =
    "select count(*) from pg_stat_activity where pid <> pg_backend_pid() and backend_type = 'client backend'";

/// Production [`ConnTracker`]: runs `COUNT_QUERY` through the instance's
/// [`Runtime::exec`] as the `postgres` superuser and parses the single
/// integer `psql` prints back.
pub struct RuntimeConnTracker {
    runtime: Arc<dyn Runtime>,
}

impl RuntimeConnTracker {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        RuntimeConnTracker { runtime }
    }
}

#[async_trait]
impl ConnTracker for RuntimeConnTracker {
    async fn active_connections(&self, runtime_id: &str) -> Result<u32, ConnTrackerError> {
        let req = ExecRequest {
            user: Some("postgres".to_string()),
            args: vec![
                "psql".to_string(),
                "-tA".to_string(),
                "-c".to_string(),
                COUNT_QUERY.to_string(),
            ],
            stdin: None,
        };
        let out = self
            .runtime
            .exec(runtime_id, &req)
            .await
            .map_err(|e| ConnTrackerError::ProbeFailed(e.to_string()))?;
        out.trim()
            .parse()
            .map_err(|_| ConnTrackerError::ProbeFailed(format!("unparseable psql output: {out:?}")))
    }
}

/// Queries `pg_stat_activity` via the Runtime's `exec` in production; here
/// a set of counts tests can pre-arm per `runtime_id`.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct FakeConnTracker {
    counts: Mutex<HashMap<String, u32>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeConnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, runtime_id: impl Into<String>, count: u32) {
        self.counts.lock().insert(runtime_id.into(), count);
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl ConnTracker for FakeConnTracker {
    async fn active_connections(&self, runtime_id: &str) -> Result<u32, ConnTrackerError> {
        Ok(self.counts.lock().get(runtime_id).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_runtime::FakeRuntime;

    #[tokio::test]
    async fn parses_psql_count_output() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_next_exec_output("3\n");
        let tracker = RuntimeConnTracker::new(runtime);
        assert_eq!(tracker.active_connections("rt-1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn rejects_unparseable_output() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_next_exec_output("not a number");
        let tracker = RuntimeConnTracker::new(runtime);
        assert!(tracker.active_connections("rt-1").await.is_err());
    }
}
