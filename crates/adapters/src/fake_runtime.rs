//! In-memory [`Runtime`] fake for engine/daemon tests. No containers are
//! ever spawned; `exec` replays scripted responses keyed by call index.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;

use crate::runtime::{ExecRequest, Runtime, RuntimeError, RuntimeInstance, StartRequest};

#[derive(Debug, Clone)]
pub struct RuntimeCall {
    pub runtime_id: String,
    pub args: Vec<String>,
}

#[derive(Default)]
struct Inner {
    started: Vec<StartRequest>,
    stopped: Vec<String>,
    exec_calls: Vec<RuntimeCall>,
    next_exec_output: Option<String>,
    fail_exec_once: Option<String>,
    missing_runtime_ids: Vec<String>,
}

pub struct FakeRuntime {
    inner: Mutex<Inner>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        FakeRuntime {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn set_next_exec_output(&self, output: impl Into<String>) {
        self.inner.lock().next_exec_output = Some(output.into());
    }

    /// The next `exec` against `runtime_id` fails with a "container
    /// missing" style message, exercising the recovery path in §4.4.
    pub fn fail_next_exec_as_missing(&self, runtime_id: impl Into<String>) {
        self.inner.lock().fail_exec_once = Some(runtime_id.into());
    }

    pub fn started_calls(&self) -> Vec<StartRequest> {
        self.inner.lock().started.clone()
    }

    pub fn stopped_calls(&self) -> Vec<String> {
        self.inner.lock().stopped.clone()
    }

    pub fn exec_calls(&self) -> Vec<RuntimeCall> {
        self.inner.lock().exec_calls.clone()
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn init_base(&self, _image: &str, data_dir: &Path) -> Result<(), RuntimeError> {
        std::fs::create_dir_all(data_dir).map_err(|e| RuntimeError::SpawnFailed(e.to_string()))?;
        std::fs::write(data_dir.join("PG_VERSION"), "15\n")
            .map_err(|e| RuntimeError::SpawnFailed(e.to_string()))?;
        Ok(())
    }

    async fn resolve_image(&self, image: &str) -> Result<String, RuntimeError> {
        Ok(format!("{image}@sha256:fake"))
    }

    async fn start(&self, req: &StartRequest) -> Result<RuntimeInstance, RuntimeError> {
        let mut inner = self.inner.lock();
        inner.started.push(req.clone());
        let port = rand::thread_rng().gen_range(20000..40000);
        Ok(RuntimeInstance {
            runtime_id: format!("fake-runtime-{}", inner.started.len()),
            host: "127.0.0.1".into(),
            port,
        })
    }

    async fn exec(&self, runtime_id: &str, req: &ExecRequest) -> Result<String, RuntimeError> {
        let mut inner = self.inner.lock();
        inner.exec_calls.push(RuntimeCall {
            runtime_id: runtime_id.to_string(),
            args: req.args.clone(),
        });
        if inner.fail_exec_once.as_deref() == Some(runtime_id) {
            inner.fail_exec_once = None;
            inner.missing_runtime_ids.push(runtime_id.to_string());
            return Err(RuntimeError::ExecFailed(format!(
                "no such container: {runtime_id}"
            )));
        }
        Ok(inner.next_exec_output.take().unwrap_or_default())
    }

    async fn stop(&self, runtime_id: &str) -> Result<(), RuntimeError> {
        self.inner.lock().stopped.push(runtime_id.to_string());
        Ok(())
    }

    async fn wait_for_ready(&self, _runtime_id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exec_fails_once_then_succeeds() {
        let runtime = FakeRuntime::new();
        runtime.fail_next_exec_as_missing("rt-1");
        let req = ExecRequest {
            user: None,
            args: vec!["-c".into(), "select 1".into()],
            stdin: None,
        };
        let err = runtime.exec("rt-1", &req).await.unwrap_err();
        assert!(RuntimeError::looks_like_missing_container(&err.to_string()));
        let ok = runtime.exec("rt-1", &req).await;
        assert!(ok.is_ok());
    }
}
