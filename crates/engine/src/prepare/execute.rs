//! Execution algorithm (§4.1 steps 1-6): clones the first uncached step's
//! parent, starts a container, applies the uncached step suffix through
//! the DBMS plug-in, snapshots each result, and — unless `plan_only` —
//! clones the final state into a fresh instance.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlrs_adapters::dbms::dsn_for;
use sqlrs_adapters::{LiquibaseStepRequest, PsqlStepRequest, StartRequest};
use sqlrs_core::id::{InstanceId, StateId, TaskId};
use sqlrs_core::image::CanonicalImage;
use sqlrs_core::model::{
    EventType, InputKind, InstanceMode, JobEvent, JobStatus, PrepareKind, Task, TaskStatus, TaskType,
};
use sqlrs_core::proto::{PrepareJobResult, PrepareRequest};
use sqlrs_statefs::layout;
use sqlrs_storage::JobPatch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::EngineError;
use crate::planner::{self, PlannedStep};

use super::PrepareCoordinator;

const READY_TIMEOUT: Duration = Duration::from_secs(30);

struct PlannedTask {
    step: PlannedStep,
    task_hash: String,
    cached_state: Option<sqlrs_core::model::State>,
}

/// §3/§8: a planned step materializes as three catalog rows — `plan`
/// (the planning decision for this step), `state_execute` (applying it),
/// and `snapshot` (persisting the resulting directory) — that move through
/// the cache/execute lifecycle together and always carry the same `cached`
/// flag and `output_state_id`.
struct StepTaskIds {
    plan: TaskId,
    execute: TaskId,
    snapshot: TaskId,
}

impl StepTaskIds {
    fn all(&self) -> [TaskId; 3] {
        [self.plan.clone(), self.execute.clone(), self.snapshot.clone()]
    }
}

pub(super) async fn run(
    coord: &Arc<PrepareCoordinator>,
    job_id: &sqlrs_core::id::JobId,
    request: &PrepareRequest,
    token: &CancellationToken,
) -> Result<(), EngineError> {
    coord.catalog.update_job(
        job_id,
        JobPatch {
            status: Some(JobStatus::Running),
            started_at: Some(Utc::now()),
            ..Default::default()
        },
    )?;
    emit(coord, job_id, EventType::Status, Some(JobStatus::Running), None, None)?;

    match run_inner(coord, job_id, request, token).await {
        Ok(result) => {
            let result_json = result.as_ref().map(|r| serde_json::to_value(r).unwrap_or_default());
            coord.catalog.update_job(
                job_id,
                JobPatch {
                    status: Some(JobStatus::Succeeded),
                    finished_at: Some(Utc::now()),
                    result_json: result_json.clone(),
                    ..Default::default()
                },
            )?;
            emit(coord, job_id, EventType::Result, Some(JobStatus::Succeeded), None, result_json)?;
            Ok(())
        }
        Err(e) => {
            let body = e.to_error_body();
            let error_json = serde_json::to_value(&body).unwrap_or_default();
            coord.catalog.update_job(
                job_id,
                JobPatch {
                    status: Some(JobStatus::Failed),
                    finished_at: Some(Utc::now()),
                    error_json: Some(error_json.clone()),
                    ..Default::default()
                },
            )?;
            emit(coord, job_id, EventType::Error, Some(JobStatus::Failed), Some(error_json), None)?;
            Err(e)
        }
    }
}

/// Shorthand over [`Catalog::append_event`] for the common `(event_type,
/// job_status, error_json_or_none, result_json_or_none)` shapes this module
/// emits; `message` carries the one free-text field callers use for `log`
/// lines.
fn emit(
    coord: &PrepareCoordinator,
    job_id: &sqlrs_core::id::JobId,
    event_type: EventType,
    status: Option<JobStatus>,
    error_json: Option<serde_json::Value>,
    result_json: Option<serde_json::Value>,
) -> Result<JobEvent, EngineError> {
    Ok(coord
        .catalog
        .append_event(job_id, event_type, status, None, None, result_json, error_json)?)
}

fn log_event(coord: &PrepareCoordinator, job_id: &sqlrs_core::id::JobId, message: impl Into<String>) {
    let _ = coord
        .catalog
        .append_event(job_id, EventType::Log, None, None, Some(message.into()), None, None);
}

fn task_event(coord: &PrepareCoordinator, job_id: &sqlrs_core::id::JobId, task_id: &TaskId, message: impl Into<String>) {
    let _ = coord.catalog.append_event(
        job_id,
        EventType::Task,
        None,
        Some(task_id.clone()),
        Some(message.into()),
        None,
        None,
    );
}

fn base_fingerprint(image_id: &str) -> String {
    format!("{image_id}empty")
}

async fn run_inner(
    coord: &Arc<PrepareCoordinator>,
    job_id: &sqlrs_core::id::JobId,
    request: &PrepareRequest,
    token: &CancellationToken,
) -> Result<Option<PrepareJobResult>, EngineError> {
    let image = CanonicalImage::parse(&request.image_id);
    let steps = planner::plan_steps(request);
    let kind_str = request.prepare_kind.as_str();
    let prepare_args_normalized = steps
        .iter()
        .map(|s| s.canonical.clone())
        .collect::<Vec<_>>()
        .join(";");

    let resolved_image_id = coord
        .runtime
        .resolve_image(&request.image_id)
        .await
        .map_err(|e| EngineError::RuntimeFailure(e.to_string()))?;

    let mut planned = Vec::with_capacity(steps.len());
    let mut input_fingerprint = base_fingerprint(&request.image_id);
    for step in &steps {
        let task_hash = sqlrs_core::hash::task_hash(&resolved_image_id, &input_fingerprint, kind_str, &step.canonical);
        let cached_state = coord.catalog.find_state_by_fingerprint(&request.image_id, &task_hash);
        input_fingerprint = task_hash.clone();
        planned.push(PlannedTask {
            step: step.clone(),
            task_hash,
            cached_state,
        });
    }

    let step_ids: Vec<StepTaskIds> = planned
        .iter()
        .map(|_| StepTaskIds {
            plan: TaskId::new(coord.id_gen.next_id()),
            execute: TaskId::new(coord.id_gen.next_id()),
            snapshot: TaskId::new(coord.id_gen.next_id()),
        })
        .collect();
    persist_task_rows(coord, job_id, request, &resolved_image_id, &planned, &step_ids)?;

    let first_uncached = planned.iter().position(|p| p.cached_state.is_none());

    let mut last_state_id = None;
    let mut last_state_fingerprint = None;

    // Cached prefix: no I/O, just thread forward the state ids it already produced.
    for p in planned.iter().take_while(|p| p.cached_state.is_some()) {
        // `take_while` already filtered this to `Some`.
        #[allow(clippy::expect_used)]
        let state = p.cached_state.as_ref().expect("filtered by take_while");
        last_state_id = Some(state.state_id.clone());
        last_state_fingerprint = Some(state.state_fingerprint.clone());
    }

    if let Some(k) = first_uncached {
        let (final_state_id, final_fingerprint) =
            execute_uncached_suffix(coord, job_id, request, &image, &resolved_image_id, &planned, &step_ids, k, token)
                .await?;
        last_state_id = Some(final_state_id);
        last_state_fingerprint = Some(final_fingerprint);
    }

    let Some(final_state_id) = last_state_id else {
        // No steps at all: bind directly to the empty base.
        return finalize(coord, job_id, request, &image, &resolved_image_id, None, &prepare_args_normalized, token).await;
    };
    let _ = last_state_fingerprint;

    finalize(
        coord,
        job_id,
        request,
        &image,
        &resolved_image_id,
        Some(final_state_id),
        &prepare_args_normalized,
        token,
    )
    .await
}

/// Materializes the per-step task rows (§3/§8 scenario 1): each planned
/// step becomes a `plan`/`state_execute`/`snapshot` triplet sharing one
/// `task_hash`, `cached` flag, and `output_state_id` — cached up front when
/// a matching state already exists, `queued` otherwise (execution fills in
/// `started_at`/`finished_at`/`status` per triplet as steps complete).
fn persist_task_rows(
    coord: &PrepareCoordinator,
    job_id: &sqlrs_core::id::JobId,
    request: &PrepareRequest,
    resolved_image_id: &str,
    planned: &[PlannedTask],
    step_ids: &[StepTaskIds],
) -> Result<(), EngineError> {
    let mut prior_state_id: Option<StateId> = None;
    let mut position: u32 = 0;
    let mut tasks: Vec<Task> = Vec::with_capacity(planned.len() * 3);
    for (i, p) in planned.iter().enumerate() {
        let (input_kind, input_id) = match &prior_state_id {
            Some(sid) => (InputKind::State, sid.as_str().to_string()),
            None => (InputKind::Image, request.image_id.clone()),
        };
        let status = if p.cached_state.is_some() {
            TaskStatus::Cached
        } else {
            TaskStatus::Queued
        };
        let output_state_id = p.cached_state.as_ref().map(|s| s.state_id.clone());
        if let Some(sid) = &output_state_id {
            prior_state_id = Some(sid.clone());
        }
        let cached = Some(p.cached_state.is_some());
        let ids = &step_ids[i];

        for (task_id, task_type) in [
            (&ids.plan, TaskType::Plan),
            (&ids.execute, TaskType::StateExecute),
            (&ids.snapshot, TaskType::Snapshot),
        ] {
            tasks.push(Task {
                job_id: job_id.clone(),
                task_id: task_id.clone(),
                position,
                task_type,
                status,
                planner_kind: request.prepare_kind,
                input_kind,
                input_id: input_id.clone(),
                image_id: request.image_id.clone(),
                resolved_image_id: Some(resolved_image_id.to_string()),
                task_hash: Some(p.task_hash.clone()),
                output_state_id: output_state_id.clone(),
                cached,
                instance_mode: InstanceMode::None,
                changeset: p.step.changeset.clone(),
                started_at: None,
                finished_at: None,
                error_json: None,
            });
            position += 1;
        }
    }
    coord.catalog.replace_tasks(job_id, tasks)?;
    Ok(())
}

/// Appends the `instance_create` task (§3/§8) that finalize() runs in the
/// non-`plan_only` path, after the triplets every planned step already got.
fn append_instance_create_task(
    coord: &PrepareCoordinator,
    job_id: &sqlrs_core::id::JobId,
    request: &PrepareRequest,
    resolved_image_id: &str,
    state_id: &StateId,
) -> Result<TaskId, EngineError> {
    let mut tasks = coord.catalog.get_tasks(job_id);
    let position = tasks.iter().map(|t| t.position).max().map_or(0, |p| p + 1);
    let task_id = TaskId::new(coord.id_gen.next_id());
    tasks.push(Task {
        job_id: job_id.clone(),
        task_id: task_id.clone(),
        position,
        task_type: TaskType::InstanceCreate,
        status: TaskStatus::Running,
        planner_kind: request.prepare_kind,
        input_kind: InputKind::State,
        input_id: state_id.as_str().to_string(),
        image_id: request.image_id.clone(),
        resolved_image_id: Some(resolved_image_id.to_string()),
        task_hash: None,
        output_state_id: None,
        cached: None,
        instance_mode: InstanceMode::Create,
        changeset: Default::default(),
        started_at: Some(Utc::now()),
        finished_at: None,
        error_json: None,
    });
    coord.catalog.replace_tasks(job_id, tasks)?;
    Ok(task_id)
}

#[allow(clippy::too_many_arguments)]
async fn execute_uncached_suffix(
    coord: &Arc<PrepareCoordinator>,
    job_id: &sqlrs_core::id::JobId,
    request: &PrepareRequest,
    image: &CanonicalImage,
    resolved_image_id: &str,
    planned: &[PlannedTask],
    step_ids: &[StepTaskIds],
    k: usize,
    token: &CancellationToken,
) -> Result<(StateId, String), EngineError> {
    let root = &coord.store_root;

    let base_dir = layout::base_dir(root, image);
    let newly_created = coord
        .statefs
        .ensure_dir(&base_dir)
        .await
        .map_err(EngineError::from)?;
    if newly_created {
        coord
            .runtime
            .init_base(&request.image_id, &base_dir)
            .await
            .map_err(|e| EngineError::RuntimeFailure(e.to_string()))?;
    }

    let parent_dir = if k == 0 {
        base_dir.clone()
    } else {
        // Everything before `k` is cached by construction (see `first_uncached` above).
        #[allow(clippy::expect_used)]
        let parent_state = planned[k - 1]
            .cached_state
            .as_ref()
            .expect("everything before k is cached by construction");
        layout::state_dir(root, image, &parent_state.state_id)
    };
    coord.statefs.ensure_dir(&parent_dir).await.map_err(EngineError::from)?;

    let runtime_dir = layout::job_runtime_dir(root, job_id);
    if let Some(parent) = runtime_dir.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::RuntimeFailure(e.to_string()))?;
    }
    let guard = coord
        .statefs
        .clone_dir(&parent_dir, &runtime_dir)
        .await
        .map_err(EngineError::from)?;
    let mount_dir = guard.path().to_path_buf();

    let instance_name = format!("sqlrs-prep-{job_id}");
    let start_req = StartRequest {
        image: resolved_image_id.to_string(),
        data_dir: mount_dir.display().to_string(),
        name: instance_name.clone(),
    };
    let mut instance = match coord.runtime.start(&start_req).await {
        Ok(i) => i,
        Err(e) => {
            let _ = guard.release().await;
            return Err(EngineError::RuntimeFailure(e.to_string()));
        }
    };
    if let Err(e) = wait_for_ready(coord, &instance.runtime_id, token).await {
        let _ = coord.runtime.stop(&instance.runtime_id).await;
        let _ = guard.release().await;
        return Err(e);
    }

    // Everything before `k` is cached by construction (see `first_uncached` above).
    #[allow(clippy::unwrap_used)]
    let mut prior_state_id: Option<StateId> = if k == 0 {
        None
    } else {
        Some(planned[k - 1].cached_state.as_ref().unwrap().state_id.clone())
    };

    for j in k..planned.len() {
        if token.is_cancelled() {
            let _ = coord.runtime.stop(&instance.runtime_id).await;
            let _ = guard.release().await;
            return Err(EngineError::Cancelled);
        }

        let task = &planned[j];
        let ids = &step_ids[j];
        let task_id = &ids.execute;
        task_event(coord, job_id, task_id, format!("step {j} running"));

        if let Err(e) = apply_step(coord, &instance, &task.step, request.prepare_kind).await {
            task_event(coord, job_id, task_id, format!("step {j} failed: {e}"));
            mark_tasks_failed(coord, job_id, &ids.all(), &e)?;
            let _ = coord.runtime.stop(&instance.runtime_id).await;
            let _ = guard.release().await;
            return Err(e);
        }

        let state_id = StateId::new(coord.id_gen.next_id());
        let state_dir = layout::state_dir(root, image, &state_id);

        if coord.statefs.capabilities().requires_db_stop {
            coord
                .runtime
                .stop(&instance.runtime_id)
                .await
                .map_err(|e| EngineError::RuntimeFailure(e.to_string()))?;
        }
        coord
            .statefs
            .snapshot(&mount_dir, &state_dir)
            .await
            .map_err(EngineError::from)?;

        let (state, created) = coord.catalog.create_state_or_adopt(
            state_id,
            task.task_hash.clone(),
            prior_state_id.clone(),
            request.image_id.clone(),
            request.prepare_kind,
            task.step.canonical.clone(),
            None,
        )?;
        if !created {
            let _ = coord.statefs.remove_path(&state_dir).await;
            log_event(coord, job_id, format!("step {j}: adopted concurrently created state {}", state.state_id));
        }

        if coord.statefs.capabilities().requires_db_stop {
            instance = coord
                .runtime
                .start(&start_req)
                .await
                .map_err(|e| EngineError::RuntimeFailure(e.to_string()))?;
            wait_for_ready(coord, &instance.runtime_id, token).await?;
        }

        mark_tasks_done(coord, job_id, &ids.all(), &state.state_id)?;
        prior_state_id = Some(state.state_id.clone());
        task_event(coord, job_id, task_id, format!("step {j} succeeded"));
    }

    // `k < planned.len()`, so the loop above ran at least once and set this.
    #[allow(clippy::expect_used)]
    let final_state_id = prior_state_id.expect("at least one step ran since k < planned.len()");
    let final_fingerprint = planned[planned.len() - 1].task_hash.clone();

    let _ = coord.runtime.stop(&instance.runtime_id).await;
    let _ = guard.release().await;

    Ok((final_state_id, final_fingerprint))
}

async fn apply_step(
    coord: &PrepareCoordinator,
    instance: &sqlrs_adapters::RuntimeInstance,
    step: &PlannedStep,
    prepare_kind: PrepareKind,
) -> Result<(), EngineError> {
    let dsn = dsn_for(&instance.host, instance.port, "postgres", "postgres");
    match prepare_kind {
        PrepareKind::Psql => {
            let req = PsqlStepRequest {
                runtime_id: instance.runtime_id.clone(),
                dsn,
                file: step.file.clone().filter(|_| step.sql.is_none()),
                sql: step.sql.clone(),
                session_args: step.session_args.clone(),
            };
            coord
                .psql
                .run(&req)
                .await
                .map(|_| ())
                .map_err(|e| EngineError::RuntimeFailure(e.to_string()))
        }
        PrepareKind::Liquibase => {
            let changeset = &step.changeset;
            let req = LiquibaseStepRequest {
                runtime_id: instance.runtime_id.clone(),
                dsn,
                changelog: step.file.clone().unwrap_or_default(),
                changeset_id: changeset.changeset_id.clone().unwrap_or_default(),
                changeset_author: changeset.changeset_author.clone().unwrap_or_default(),
                changeset_path: changeset.changeset_path.clone().unwrap_or_default(),
            };
            coord
                .liquibase
                .run(&req)
                .await
                .map(|_| ())
                .map_err(|e| EngineError::RuntimeFailure(e.to_string()))
        }
    }
}

async fn wait_for_ready(
    coord: &PrepareCoordinator,
    runtime_id: &str,
    token: &CancellationToken,
) -> Result<(), EngineError> {
    tokio::select! {
        res = coord.runtime.wait_for_ready(runtime_id, READY_TIMEOUT) => {
            res.map_err(|e| EngineError::RuntimeFailure(e.to_string()))
        }
        _ = token.cancelled() => Err(EngineError::Cancelled),
    }
}

/// Marks every row in `task_ids` failed together — a planned step's
/// `plan`/`state_execute`/`snapshot` triplet fails as one unit (§3/§8).
fn mark_tasks_failed(
    coord: &PrepareCoordinator,
    job_id: &sqlrs_core::id::JobId,
    task_ids: &[TaskId],
    error: &EngineError,
) -> Result<(), EngineError> {
    let mut tasks = coord.catalog.get_tasks(job_id);
    let error_json = Some(serde_json::to_value(error.to_error_body()).unwrap_or_default());
    for t in tasks.iter_mut().filter(|t| task_ids.contains(&t.task_id)) {
        t.status = TaskStatus::Failed;
        t.finished_at = Some(Utc::now());
        t.error_json = error_json.clone();
    }
    coord.catalog.replace_tasks(job_id, tasks)?;
    Ok(())
}

/// Marks every row in `task_ids` succeeded together, all carrying the same
/// `output_state_id` and `cached=false` (§3/§8).
fn mark_tasks_done(
    coord: &PrepareCoordinator,
    job_id: &sqlrs_core::id::JobId,
    task_ids: &[TaskId],
    state_id: &StateId,
) -> Result<(), EngineError> {
    let mut tasks = coord.catalog.get_tasks(job_id);
    for t in tasks.iter_mut().filter(|t| task_ids.contains(&t.task_id)) {
        t.status = TaskStatus::Succeeded;
        t.finished_at = Some(Utc::now());
        t.output_state_id = Some(state_id.clone());
        t.cached = Some(false);
    }
    coord.catalog.replace_tasks(job_id, tasks)?;
    Ok(())
}

/// Marks the single `task_id` row (the `instance_create` task has no
/// sibling rows) failed.
fn mark_task_failed(
    coord: &PrepareCoordinator,
    job_id: &sqlrs_core::id::JobId,
    task_id: &TaskId,
    error: &EngineError,
) -> Result<(), EngineError> {
    mark_tasks_failed(coord, job_id, std::slice::from_ref(task_id), error)
}

/// Marks the single `task_id` row (the `instance_create` task has no
/// sibling rows) succeeded, referencing the state the instance was cloned
/// from.
fn mark_instance_create_task_done(
    coord: &PrepareCoordinator,
    job_id: &sqlrs_core::id::JobId,
    task_id: &TaskId,
    state_id: &StateId,
) -> Result<(), EngineError> {
    mark_tasks_done(coord, job_id, std::slice::from_ref(task_id), state_id)
}

/// Step 6: unless `plan_only`, clones the final state into a fresh
/// instance and builds the canonical DSN; otherwise finalizes with no
/// instance (`result` stays `None`).
async fn finalize(
    coord: &Arc<PrepareCoordinator>,
    job_id: &sqlrs_core::id::JobId,
    request: &PrepareRequest,
    image: &CanonicalImage,
    resolved_image_id: &str,
    final_state_id: Option<StateId>,
    prepare_args_normalized: &str,
    token: &CancellationToken,
) -> Result<Option<PrepareJobResult>, EngineError> {
    let Some(state_id) = final_state_id else {
        return Ok(None);
    };

    if request.plan_only {
        return Ok(None);
    }

    if token.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let instance_create_task = append_instance_create_task(coord, job_id, request, resolved_image_id, &state_id)?;

    let root = &coord.store_root;
    let state_dir = layout::state_dir(root, image, &state_id);
    let instance_id = InstanceId::new(coord.id_gen.next_id());
    let instance_runtime_dir = layout::job_runtime_dir(root, job_id).with_file_name(instance_id.as_str());

    let guard = match coord.statefs.clone_dir(&state_dir, &instance_runtime_dir).await {
        Ok(g) => g,
        Err(e) => {
            let e = EngineError::from(e);
            mark_task_failed(coord, job_id, &instance_create_task, &e)?;
            return Err(e);
        }
    };
    let mount_dir = guard.path().to_path_buf();

    let start_req = StartRequest {
        image: resolved_image_id.to_string(),
        data_dir: mount_dir.display().to_string(),
        name: format!("sqlrs-{instance_id}"),
    };
    let runtime_instance = match coord.runtime.start(&start_req).await {
        Ok(i) => i,
        Err(e) => {
            let _ = guard.release().await;
            let e = EngineError::RuntimeFailure(e.to_string());
            mark_task_failed(coord, job_id, &instance_create_task, &e)?;
            return Err(e);
        }
    };
    if let Err(e) = wait_for_ready(coord, &runtime_instance.runtime_id, token).await {
        let _ = coord.runtime.stop(&runtime_instance.runtime_id).await;
        let _ = guard.release().await;
        mark_task_failed(coord, job_id, &instance_create_task, &e)?;
        return Err(e);
    }

    let kept_dir = guard.keep();
    let instance = coord.catalog.create_instance(instance_id.clone(), state_id.clone(), request.image_id.clone(), None)?;
    coord.catalog.update_instance_runtime(&instance.instance_id, runtime_instance.runtime_id.clone())?;
    coord
        .catalog
        .set_instance_runtime_dir(&instance.instance_id, kept_dir.display().to_string())?;
    mark_instance_create_task_done(coord, job_id, &instance_create_task, &state_id)?;

    let dsn = dsn_for(&runtime_instance.host, runtime_instance.port, "postgres", "postgres");
    info!(instance_id = %instance_id, state_id = %state_id, "prepare job produced instance");

    Ok(Some(PrepareJobResult {
        dsn,
        instance_id,
        state_id,
        image_id: request.image_id.clone(),
        prepare_kind: request.prepare_kind,
        prepare_args_normalized: prepare_args_normalized.to_string(),
    }))
}
