//! Prepare Coordinator (§4.1): plans a request into steps, reuses any
//! cached states, executes the uncached suffix, and persists the
//! resulting state and instance.

mod execute;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use sqlrs_adapters::{ConnTracker, LiquibaseRunner, PsqlRunner, Runtime};
use sqlrs_core::id::{IdGen, JobId};
use sqlrs_core::model::{EventType, JobEvent, JobStatus};
use sqlrs_core::proto::{Accepted, JobStatusView, PrepareRequest};
use sqlrs_statefs::StateFs;
use sqlrs_storage::Catalog;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::EngineError;
use crate::planner;

pub struct PrepareCoordinator {
    catalog: Arc<Catalog>,
    statefs: Arc<dyn StateFs>,
    runtime: Arc<dyn Runtime>,
    psql: Arc<dyn PsqlRunner>,
    liquibase: Arc<dyn LiquibaseRunner>,
    #[allow(dead_code)]
    conn_tracker: Arc<dyn ConnTracker>,
    id_gen: Arc<dyn IdGen>,
    store_root: PathBuf,
    synchronous: bool,
    cancellations: Mutex<HashMap<String, CancellationToken>>,
}

impl PrepareCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<Catalog>,
        statefs: Arc<dyn StateFs>,
        runtime: Arc<dyn Runtime>,
        psql: Arc<dyn PsqlRunner>,
        liquibase: Arc<dyn LiquibaseRunner>,
        conn_tracker: Arc<dyn ConnTracker>,
        id_gen: Arc<dyn IdGen>,
        store_root: PathBuf,
        synchronous: bool,
    ) -> Self {
        PrepareCoordinator {
            catalog,
            statefs,
            runtime,
            psql,
            liquibase,
            conn_tracker,
            id_gen,
            store_root,
            synchronous,
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    pub async fn submit(self: &Arc<Self>, request: PrepareRequest) -> Result<Accepted, EngineError> {
        planner::validate_request(&request)?;

        let canonical_request = serde_json::to_string(&request)
            .map_err(|e| EngineError::InvalidArgument(format!("request is not serializable: {e}")))?;
        let signature = sqlrs_core::hash::request_signature(&canonical_request);
        let job_id = JobId::new(self.id_gen.next_id());
        let request_json = serde_json::to_value(&request)
            .map_err(|e| EngineError::InvalidArgument(format!("request is not serializable: {e}")))?;
        let prepare_args_normalized = planner::plan_steps(&request)
            .iter()
            .map(|s| s.canonical.clone())
            .collect::<Vec<_>>()
            .join(";");

        self.catalog.create_job(
            job_id.clone(),
            request.prepare_kind,
            request.image_id.clone(),
            request.plan_only,
            request.snapshot_mode.clone(),
            prepare_args_normalized,
            signature,
            request_json,
        )?;

        let token = CancellationToken::new();
        self.cancellations.lock().insert(job_id.as_str().to_string(), token.clone());

        let status_url = format!("/v1/prepare-jobs/{job_id}");

        if self.synchronous {
            self.clone().run_job(job_id.clone(), request, token).await;
        } else {
            let this = Arc::clone(self);
            let spawned_job_id = job_id.clone();
            tokio::spawn(async move {
                this.run_job(spawned_job_id, request, token).await;
            });
        }

        Ok(Accepted { job_id, status_url })
    }

    pub fn get(&self, job_id: &JobId) -> Option<JobStatusView> {
        let job = self.catalog.get_job(job_id)?;
        let tasks = self.catalog.get_tasks(job_id);
        let result = job
            .result_json
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        let error = job
            .error_json
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        Some(JobStatusView {
            job_id: job.job_id,
            status: job.status,
            tasks,
            result,
            error,
        })
    }

    /// Returns `(events, found, done)`; `done=true` iff the job is
    /// terminal (§4.1 `EventsSince`).
    pub fn events_since(&self, job_id: &JobId, offset: usize) -> (Vec<JobEvent>, bool, bool) {
        match self.catalog.get_job(job_id) {
            Some(job) => {
                let events = self.catalog.list_events_since(job_id, offset);
                (events, true, job.status.is_terminal())
            }
            None => (Vec::new(), false, false),
        }
    }

    /// If the job is already terminal, this is a no-op and returns its
    /// current status. Otherwise a cancellation flag is set; the job
    /// transitions to `failed` with `error.code = "cancelled"` at the next
    /// cooperative checkpoint (§4.1).
    pub fn cancel(&self, job_id: &JobId) -> Option<JobStatusView> {
        if let Some(token) = self.cancellations.lock().get(job_id.as_str()) {
            token.cancel();
        }
        self.get(job_id)
    }

    /// On startup, every non-terminal `prepare_jobs` row is marked `failed`
    /// with `error.code="engine_restart"` — no attempt is made to resume
    /// in-flight snapshots, since container/filesystem intermediate state
    /// cannot be safely reattached (§4.1 `Recover`).
    pub fn recover(&self) -> Result<(), EngineError> {
        for status in [JobStatus::Queued, JobStatus::Running] {
            for job in self.catalog.list_jobs_by_status(status) {
                warn!(job_id = %job.job_id, "marking non-terminal job failed on startup");
                let error_body = sqlrs_core::error::ErrorBody::new(
                    sqlrs_core::error::ErrorKind::EngineRestart,
                    "daemon restarted while this job was in flight",
                );
                self.catalog.update_job(
                    &job.job_id,
                    sqlrs_storage::JobPatch {
                        status: Some(JobStatus::Failed),
                        finished_at: Some(chrono::Utc::now()),
                        error_json: Some(serde_json::to_value(&error_body).unwrap_or_default()),
                        ..Default::default()
                    },
                )?;
                self.catalog.append_event(
                    &job.job_id,
                    EventType::Error,
                    Some(JobStatus::Failed),
                    None,
                    Some("engine_restart".to_string()),
                    None,
                    Some(serde_json::to_value(&error_body).unwrap_or_default()),
                )?;
            }
        }
        Ok(())
    }

    async fn run_job(self: Arc<Self>, job_id: JobId, request: PrepareRequest, token: CancellationToken) {
        let result = execute::run(&self, &job_id, &request, &token).await;
        self.cancellations.lock().remove(job_id.as_str());
        if let Err(e) = result {
            error!(job_id = %job_id, error = %e, "prepare job failed");
        } else {
            info!(job_id = %job_id, "prepare job succeeded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrs_adapters::{FakeConnTracker, FakeLiquibaseRunner, FakePsqlRunner, FakeRuntime};
    use sqlrs_core::id::UuidIdGen;
    use sqlrs_core::model::{JobStatus as Status, TaskStatus};
    use sqlrs_statefs::fake::FakeStateFs;
    use sqlrs_statefs::Capabilities;
    use tempfile::tempdir;

    struct Harness {
        _dir: tempfile::TempDir,
        coord: Arc<PrepareCoordinator>,
        runtime: Arc<FakeRuntime>,
        psql: Arc<FakePsqlRunner>,
    }

    fn harness() -> Harness {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(dir.path()).unwrap());
        let statefs = Arc::new(FakeStateFs::new(Capabilities::COPY));
        let runtime = Arc::new(FakeRuntime::new());
        let psql = Arc::new(FakePsqlRunner::new());
        let liquibase = Arc::new(FakeLiquibaseRunner::new());
        let conn_tracker = Arc::new(FakeConnTracker::new());
        let coord = Arc::new(PrepareCoordinator::new(
            catalog,
            statefs,
            runtime.clone(),
            psql.clone(),
            liquibase,
            conn_tracker,
            Arc::new(UuidIdGen),
            dir.path().to_path_buf(),
            true,
        ));
        Harness {
            _dir: dir,
            coord,
            runtime,
            psql,
        }
    }

    fn psql_request(plan_only: bool) -> PrepareRequest {
        PrepareRequest {
            prepare_kind: sqlrs_core::model::PrepareKind::Psql,
            image_id: "postgres:15".into(),
            plan_only,
            snapshot_mode: "always".into(),
            psql_args: vec!["-c".into(), "select 1".into()],
            liquibase_changelog: None,
            liquibase_exec_mode: None,
        }
    }

    /// §8 scenario 1: a single-step plan-only job materializes exactly
    /// three tasks (`plan`, `state_execute`, `snapshot`), all sharing one
    /// `output_state_id`; resubmitting produces the same triplet shape with
    /// `cached=true` throughout and zero extra `psql` calls.
    #[tokio::test]
    async fn plan_only_cache_hit_on_resubmit() {
        let h = harness();
        let accepted1 = h.coord.submit(psql_request(true)).await.unwrap();
        let status1 = h.coord.get(&accepted1.job_id).unwrap();
        assert_eq!(status1.status, Status::Succeeded);
        assert_eq!(status1.tasks.len(), 3);
        assert_eq!(
            status1.tasks.iter().map(|t| t.task_type).collect::<Vec<_>>(),
            vec![
                sqlrs_core::model::TaskType::Plan,
                sqlrs_core::model::TaskType::StateExecute,
                sqlrs_core::model::TaskType::Snapshot,
            ]
        );
        assert!(status1.tasks.iter().all(|t| t.cached == Some(false)));
        let first_state = status1.tasks[0].output_state_id.clone().unwrap();
        assert!(status1
            .tasks
            .iter()
            .all(|t| t.output_state_id == Some(first_state.clone())));
        assert_eq!(h.psql.calls().len(), 1);

        let accepted2 = h.coord.submit(psql_request(true)).await.unwrap();
        let status2 = h.coord.get(&accepted2.job_id).unwrap();
        assert_eq!(status2.status, Status::Succeeded);
        assert_eq!(status2.tasks.len(), 3);
        assert!(status2.tasks.iter().all(|t| t.cached == Some(true)));
        assert!(status2
            .tasks
            .iter()
            .all(|t| t.output_state_id == Some(first_state.clone())));
        // The cached run must not re-invoke the step runner.
        assert_eq!(h.psql.calls().len(), 1);
        // plan_only: no instance ever gets created.
        assert!(status2.result.is_none());
    }

    /// §8 scenario 2: a non-plan-only submission produces a succeeded job
    /// whose result references a real, fetchable instance.
    #[tokio::test]
    async fn full_provisioning_creates_instance() {
        let h = harness();
        let accepted = h.coord.submit(psql_request(false)).await.unwrap();
        let status = h.coord.get(&accepted.job_id).unwrap();
        assert_eq!(status.status, Status::Succeeded);
        let result = status.result.expect("succeeded job carries a result");
        assert_eq!(result.image_id, "postgres:15");
        // `copy` StateFS requires a DB stop around the snapshot, so the
        // scratch container is started/stopped/restarted/stopped around
        // the single step, then a third container is started for the
        // served instance cloned off the final state.
        assert_eq!(h.runtime.started_calls().len(), 3);
        assert_eq!(h.runtime.stopped_calls().len(), 2);
        // The single step's triplet plus the finalize-path `instance_create`.
        assert_eq!(status.tasks.len(), 4);
        let instance_task = status.tasks.last().expect("instance_create task present");
        assert_eq!(instance_task.task_type, sqlrs_core::model::TaskType::InstanceCreate);
        assert_eq!(instance_task.status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn step_failure_marks_job_and_task_failed() {
        let h = harness();
        h.psql.fail_next("syntax error");
        let accepted = h.coord.submit(psql_request(true)).await.unwrap();
        let status = h.coord.get(&accepted.job_id).unwrap();
        assert_eq!(status.status, Status::Failed);
        assert!(status.error.is_some());
        // The whole `plan`/`state_execute`/`snapshot` triplet fails together.
        assert_eq!(status.tasks.len(), 3);
        assert!(status.tasks.iter().all(|t| t.status == TaskStatus::Failed));
    }

    #[tokio::test]
    async fn cancel_on_terminal_job_is_a_noop_returning_current_status() {
        let h = harness();
        let accepted = h.coord.submit(psql_request(true)).await.unwrap();
        let before = h.coord.get(&accepted.job_id).unwrap();
        let cancelled = h.coord.cancel(&accepted.job_id).unwrap();
        assert_eq!(cancelled.status, before.status);
        assert_eq!(cancelled.status, Status::Succeeded);
    }

    #[test]
    fn cancel_unknown_job_returns_none() {
        let h = harness();
        assert!(h.coord.cancel(&JobId::new("no-such-job")).is_none());
    }

    /// §4.1 `Recover`: a job left `running` across a restart is marked
    /// `failed` with `error.code="engine_restart"` and not resumed.
    #[tokio::test]
    async fn recover_fails_non_terminal_jobs_with_engine_restart() {
        let h = harness();
        let job_id = JobId::new("stale-job");
        h.coord
            .catalog
            .create_job(
                job_id.clone(),
                sqlrs_core::model::PrepareKind::Psql,
                "postgres:15".into(),
                false,
                "always".into(),
                "".into(),
                "sig".into(),
                serde_json::json!({}),
            )
            .unwrap();
        h.coord
            .catalog
            .update_job(
                &job_id,
                sqlrs_storage::JobPatch {
                    status: Some(Status::Running),
                    started_at: Some(chrono::Utc::now()),
                    ..Default::default()
                },
            )
            .unwrap();

        h.coord.recover().unwrap();

        let status = h.coord.get(&job_id).unwrap();
        assert_eq!(status.status, Status::Failed);
        let error = status.error.expect("recovered job carries an error body");
        assert_eq!(error.code, "engine_restart");

        let (events, found, done) = h.coord.events_since(&job_id, 0);
        assert!(found);
        assert!(done);
        assert!(events.iter().any(|e| matches!(e.event_type, sqlrs_core::model::EventType::Error)));
    }
}
