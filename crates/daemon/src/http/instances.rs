//! `/v1/instances` (§6.2, §4.2, §4.5): list/get/delete. `GetInstance` on a
//! name redirects 307 to the canonical `instance_id` path rather than
//! answering inline, so clients always converge on the opaque id.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::Deserialize;
use sqlrs_core::id::InstanceId;
use sqlrs_core::proto::InstanceEntry;
use sqlrs_engine::DeleteOptions;
use sqlrs_storage::InstanceFilter;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct InstancesQuery {
    state: Option<String>,
    image: Option<String>,
    id_prefix: Option<String>,
}

pub async fn list_instances(
    State(state): State<AppState>,
    Query(query): Query<InstancesQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let filter = InstanceFilter {
        image_id: query.image,
        state_id: query.state,
        id_prefix: query.id_prefix,
    };
    let rows = state.catalog.list_instances(&filter)?;
    let entries: Vec<InstanceEntry> = rows.into_iter().map(InstanceEntry::from).collect();
    Ok(super::list_response(&headers, entries))
}

/// Resolves `instance_ref` as either a literal id or a name. Name lookups
/// redirect 307 to `/v1/instances/{instance_id}` rather than answering
/// inline (§6.2 "200 InstanceEntry or 307 to canonical id").
pub async fn get_instance(
    State(state): State<AppState>,
    Path(instance_ref): Path<String>,
) -> Result<Response, ApiError> {
    let (instance, found, by_name) = state.catalog.get_instance(&instance_ref);
    let instance = instance.filter(|_| found).ok_or_else(|| ApiError::not_found(format!("instance {instance_ref} not found")))?;
    if by_name {
        let location = format!("/v1/instances/{}", instance.instance_id);
        return Ok(Redirect::temporary(&location).into_response());
    }
    Ok(Json(InstanceEntry::from(instance)).into_response())
}

#[derive(Debug, Deserialize, Default)]
pub struct DeleteQuery {
    #[serde(default)]
    force: bool,
    #[serde(default)]
    dry_run: bool,
}

pub async fn delete_instance(
    State(state): State<AppState>,
    Path(instance_ref): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Response, ApiError> {
    let (instance, found, _) = state.catalog.get_instance(&instance_ref);
    let instance = instance.filter(|_| found).ok_or_else(|| ApiError::not_found(format!("instance {instance_ref} not found")))?;

    let result = state
        .deletion
        .delete_instance(
            &InstanceId::new(instance.instance_id.as_str()),
            DeleteOptions {
                force: query.force,
                recurse: false,
                dry_run: query.dry_run,
            },
        )
        .await?;

    let status = if result.root.outcome == sqlrs_core::proto::DeletionOutcome::Blocked {
        StatusCode::CONFLICT
    } else {
        StatusCode::OK
    };
    Ok((status, Json(result)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_query_defaults_to_false() {
        let query: DeleteQuery = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(!query.force);
        assert!(!query.dry_run);
    }
}
