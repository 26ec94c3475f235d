//! `/v1/names` (§6.2, §4.2): read-only alias list/lookup over the Registry.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use sqlrs_core::proto::NameEntry;
use sqlrs_storage::NameFilter;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NamesQuery {
    image: Option<String>,
    id_prefix: Option<String>,
}

pub async fn list_names(
    State(state): State<AppState>,
    Query(query): Query<NamesQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let filter = NameFilter {
        image_id: query.image,
        id_prefix: query.id_prefix,
    };
    let rows = state.catalog.list_names(&filter)?;
    let entries: Vec<NameEntry> = rows.into_iter().map(NameEntry::from).collect();
    Ok(super::list_response(&headers, entries))
}

pub async fn get_name(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<NameEntry>, ApiError> {
    let (entry, found) = state.catalog.get_name(&name);
    if !found {
        return Err(ApiError::not_found(format!("name {name} not found")));
    }
    // `found` is only true when `get_name` also returned a row.
    #[allow(clippy::expect_used)]
    Ok(Json(entry.map(NameEntry::from).expect("found implies present")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_defaults_to_no_filters() {
        let query: NamesQuery = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(query.image.is_none());
        assert!(query.id_prefix.is_none());
    }
}
