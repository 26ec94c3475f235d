//! `/v1/prepare-jobs` (§6.2, §4.1): submit/list/get/delete, the NDJSON
//! event tail, and cooperative cancellation.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use sqlrs_core::id::JobId;
use sqlrs_core::model::JobStatus;
use sqlrs_core::proto::{Accepted, JobStatusView, PrepareRequest};
use sqlrs_engine::DeleteOptions;
use sqlrs_storage::JobFilter;

use crate::error::ApiError;
use crate::AppState;

pub async fn submit(State(state): State<AppState>, Json(request): Json<PrepareRequest>) -> Result<Response, ApiError> {
    let accepted: Accepted = state.prepare.submit(request).await?;
    Ok((StatusCode::CREATED, Json(accepted)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    image: Option<String>,
    status: Option<JobStatus>,
}

pub async fn list(State(state): State<AppState>, Query(query): Query<JobsQuery>, headers: HeaderMap) -> Response {
    let filter = JobFilter {
        image_id: query.image,
        status: query.status,
    };
    let jobs = state.catalog.list_jobs(&filter);
    let views: Vec<JobStatusView> = jobs
        .into_iter()
        .filter_map(|j| state.prepare.get(&j.job_id))
        .collect();
    super::list_response(&headers, views)
}

pub async fn get(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<Json<JobStatusView>, ApiError> {
    state
        .prepare
        .get(&JobId::new(job_id.clone()))
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("prepare job {job_id} not found")))
}

#[derive(Debug, Deserialize, Default)]
pub struct DeleteJobQuery {
    #[serde(default)]
    force: bool,
    #[serde(default)]
    dry_run: bool,
}

/// Deleting a prepare job (§4.5 graph construction treats it as a node
/// producing a state): cancels it first if still in flight, then removes
/// the row through the same [`DeletionPlanner`](sqlrs_engine::DeletionPlanner)
/// used for instances/states isn't applicable here directly — jobs have no
/// dedicated planner entry point, so this cancels in-place and deletes the
/// catalog row, returning a minimal result shape consistent with the other
/// delete endpoints.
pub async fn delete(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<DeleteJobQuery>,
) -> Result<Response, ApiError> {
    let id = JobId::new(job_id.clone());
    let job = state.catalog.get_job(&id).ok_or_else(|| ApiError::not_found(format!("prepare job {job_id} not found")))?;

    if !job.status.is_terminal() && !query.force {
        return Ok((
            StatusCode::CONFLICT,
            Json(sqlrs_core::error::ErrorBody::new(
                sqlrs_core::error::ErrorKind::Conflict,
                "job is still running; pass force=true to cancel and delete",
            )),
        )
            .into_response());
    }

    if query.dry_run {
        return Ok(StatusCode::OK.into_response());
    }

    if !job.status.is_terminal() {
        state.prepare.cancel(&id);
    }
    state.catalog.delete_job(&id)?;
    Ok(StatusCode::OK.into_response())
}

pub async fn events(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<Response, ApiError> {
    let id = JobId::new(job_id.clone());
    let (events, found, _done) = state.prepare.events_since(&id, 0);
    if !found {
        return Err(ApiError::not_found(format!("prepare job {job_id} not found")));
    }

    let mut body = String::new();
    for event in &events {
        if let Ok(line) = serde_json::to_string(event) {
            body.push_str(&line);
            body.push('\n');
        }
    }
    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/x-ndjson")],
        body,
    )
        .into_response())
}

pub async fn cancel(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<Response, ApiError> {
    let id = JobId::new(job_id.clone());
    let view = state.prepare.cancel(&id).ok_or_else(|| ApiError::not_found(format!("prepare job {job_id} not found")))?;
    let status = if view.status.is_terminal() { StatusCode::OK } else { StatusCode::ACCEPTED };
    Ok((status, Json(view)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_query_without_filters_deserializes() {
        let query: JobsQuery = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(query.image.is_none());
        assert!(query.status.is_none());
    }

    #[test]
    fn jobs_query_parses_status() {
        let query: JobsQuery = serde_json::from_value(serde_json::json!({"status": "running"})).unwrap();
        assert_eq!(query.status, Some(JobStatus::Running));
    }
}
