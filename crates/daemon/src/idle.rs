//! Idle-timeout ticker (§4.6 "Idle shutdown", §5 timeouts: 1s tick, 5s
//! graceful-shutdown drain).

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::info;

use crate::AppState;

const TICK: Duration = Duration::from_secs(1);

/// Runs until `idle_for_ms() >= idle_timeout`, then sends on `shutdown_tx`
/// and returns. A `None` timeout disables idle shutdown entirely (the
/// ticker still runs, touching nothing, so tests can await it without
/// special-casing).
pub async fn run(state: AppState, idle_timeout: Option<Duration>, shutdown_tx: watch::Sender<()>) {
    let Some(idle_timeout) = idle_timeout else {
        return;
    };
    let mut ticker = interval(TICK);
    loop {
        ticker.tick().await;
        if state.idle_for_ms() >= idle_timeout.as_millis() as i64 {
            info!(idle_timeout_secs = idle_timeout.as_secs(), "idle timeout reached, shutting down");
            let _ = shutdown_tx.send(());
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrs_adapters::FakeConnTracker;
    use sqlrs_engine::{Config, DeletionPlanner, PrepareCoordinator};
    use sqlrs_statefs::fake::FakeStateFs;
    use sqlrs_storage::Catalog;
    use std::sync::atomic::AtomicI64;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn test_state(dir: &std::path::Path) -> AppState {
        let catalog = Arc::new(Catalog::open(dir).unwrap());
        let statefs = Arc::new(FakeStateFs::default());
        let runtime = Arc::new(sqlrs_adapters::FakeRuntime::new());
        let psql = Arc::new(sqlrs_adapters::FakePsqlRunner::new());
        let liquibase = Arc::new(sqlrs_adapters::FakeLiquibaseRunner::new());
        let conn_tracker: Arc<dyn sqlrs_adapters::ConnTracker> = Arc::new(FakeConnTracker::new());
        let id_gen = Arc::new(sqlrs_core::id::SequentialIdGen::new());
        let prepare = Arc::new(PrepareCoordinator::new(
            catalog.clone(),
            statefs.clone(),
            runtime.clone(),
            psql,
            liquibase,
            conn_tracker.clone(),
            id_gen,
            dir.to_path_buf(),
            true,
        ));
        let deletion = Arc::new(DeletionPlanner::new(catalog.clone(), statefs, conn_tracker.clone(), dir.to_path_buf()));
        let runner = Arc::new(sqlrs_engine::Runner::new(catalog.clone(), runtime.clone()));
        let config = Arc::new(Config::open(dir).unwrap());
        AppState {
            catalog,
            prepare,
            deletion,
            runner,
            config,
            conn_tracker,
            auth_token: "tok".into(),
            instance_id: "inst".into(),
            version: "0.1.0".into(),
            pid: std::process::id(),
            last_activity_ms: Arc::new(AtomicI64::new(0)),
        }
    }

    #[tokio::test]
    async fn fires_once_idle_timeout_elapses() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path());
        state.touch_activity();
        let (tx, mut rx) = watch::channel(());
        rx.borrow_and_update();
        let handle = tokio::spawn(run(state, Some(Duration::from_millis(1)), tx));
        tokio::time::timeout(Duration::from_secs(2), rx.changed()).await.unwrap().unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn none_timeout_never_fires() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path());
        let (tx, _rx) = watch::channel(());
        tokio::time::timeout(Duration::from_millis(50), run(state, None, tx))
            .await
            .expect("disabled idle ticker should return immediately");
    }
}
