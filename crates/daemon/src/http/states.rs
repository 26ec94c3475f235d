//! `/v1/states` (§6.2, §4.2, §4.5): list/get/delete over content-addressed
//! snapshots.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use sqlrs_core::id::StateId;
use sqlrs_core::model::PrepareKind;
use sqlrs_core::proto::StateEntry;
use sqlrs_engine::DeleteOptions;
use sqlrs_storage::StateFilter;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StatesQuery {
    kind: Option<String>,
    image: Option<String>,
    id_prefix: Option<String>,
}

pub async fn list_states(
    State(state): State<AppState>,
    Query(query): Query<StatesQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let prepare_kind = query
        .kind
        .map(|k| k.parse::<PrepareKind>())
        .transpose()
        .map_err(ApiError::invalid_argument)?;
    let filter = StateFilter {
        image_id: query.image,
        id_prefix: query.id_prefix,
        prepare_kind,
    };
    let rows = state.catalog.list_states(&filter)?;
    let entries: Vec<StateEntry> = rows.into_iter().map(StateEntry::from).collect();
    Ok(super::list_response(&headers, entries))
}

pub async fn get_state(State(state): State<AppState>, Path(state_id): Path<String>) -> Result<Json<StateEntry>, ApiError> {
    let (found, ok) = state.catalog.get_state(&StateId::new(state_id.clone()));
    if !ok {
        return Err(ApiError::not_found(format!("state {state_id} not found")));
    }
    // `ok` is only true when `get_state` also returned a row.
    #[allow(clippy::expect_used)]
    Ok(Json(found.map(StateEntry::from).expect("ok implies present")))
}

#[derive(Debug, Deserialize, Default)]
pub struct DeleteStateQuery {
    #[serde(default)]
    recurse: bool,
    #[serde(default)]
    force: bool,
    #[serde(default)]
    dry_run: bool,
}

pub async fn delete_state(
    State(state): State<AppState>,
    Path(state_id): Path<String>,
    Query(query): Query<DeleteStateQuery>,
) -> Result<Response, ApiError> {
    let result = state
        .deletion
        .delete_state(
            &StateId::new(state_id),
            DeleteOptions {
                force: query.force,
                recurse: query.recurse,
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
    fn query_parses_kind_alias() {
        let query: StatesQuery = serde_json::from_value(serde_json::json!({"kind": "psql"})).unwrap();
        assert_eq!(query.kind.as_deref(), Some("psql"));
    }
}
