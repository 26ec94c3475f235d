//! `GET /v1/health` (§6.2): the only endpoint exempt from bearer auth, and
//! the one [`crate::AppState`]-agnostic probe the Orchestrator's discovery
//! loop polls.

use axum::extract::State;
use axum::Json;
use sqlrs_core::proto::HealthResponse;

use crate::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: state.version.clone(),
        instance_id: state.instance_id.clone(),
        pid: state.pid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrs_core::id::SequentialIdGen;
    use sqlrs_engine::{Config, DeletionPlanner, PrepareCoordinator, Runner};
    use sqlrs_storage::Catalog;
    use std::sync::atomic::AtomicI64;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reports_ok_with_configured_identity() {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(dir.path()).unwrap());
        let statefs = Arc::new(sqlrs_statefs::fake::FakeStateFs::default());
        let runtime = Arc::new(sqlrs_adapters::FakeRuntime::new());
        let psql = Arc::new(sqlrs_adapters::FakePsqlRunner::new());
        let liquibase = Arc::new(sqlrs_adapters::FakeLiquibaseRunner::new());
        let conn_tracker: Arc<dyn sqlrs_adapters::ConnTracker> = Arc::new(sqlrs_adapters::FakeConnTracker::new());
        let prepare = Arc::new(PrepareCoordinator::new(
            catalog.clone(),
            statefs.clone(),
            runtime.clone(),
            psql,
            liquibase,
            conn_tracker.clone(),
            Arc::new(SequentialIdGen::new()),
            dir.path().to_path_buf(),
            true,
        ));
        let deletion = Arc::new(DeletionPlanner::new(catalog.clone(), statefs, conn_tracker.clone(), dir.path().to_path_buf()));
        let runner = Arc::new(Runner::new(catalog.clone(), runtime));
        let config = Arc::new(Config::open(dir.path()).unwrap());
        let state = AppState {
            catalog,
            prepare,
            deletion,
            runner,
            config,
            conn_tracker,
            auth_token: "tok".into(),
            instance_id: "inst-1".into(),
            version: "0.1.0".into(),
            pid: 4242,
            last_activity_ms: Arc::new(AtomicI64::new(0)),
        };

        let Json(body) = health(State(state)).await;
        assert!(body.ok);
        assert_eq!(body.instance_id, "inst-1");
        assert_eq!(body.pid, 4242);
    }
}
