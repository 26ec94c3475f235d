//! `/v1/config` (§6.2, §4.6): dot-path get/set/remove over the layered
//! effective/override document, plus the JSON Schema describing it.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct GetConfigQuery {
    #[serde(default)]
    path: String,
    #[serde(default = "default_effective")]
    effective: bool,
}

fn default_effective() -> bool {
    true
}

pub async fn get_config(State(state): State<AppState>, Query(query): Query<GetConfigQuery>) -> Result<Json<Value>, ApiError> {
    let value = state.config.get(&query.path, query.effective)?;
    Ok(Json(value))
}

#[derive(Debug, Deserialize)]
pub struct SetConfigQuery {
    path: String,
}

pub async fn set_config(
    State(state): State<AppState>,
    Query(query): Query<SetConfigQuery>,
    Json(value): Json<Value>,
) -> Result<Response, ApiError> {
    state.config.set(&query.path, value)?;
    Ok(StatusCode::OK.into_response())
}

#[derive(Debug, Deserialize)]
pub struct RemoveConfigQuery {
    path: String,
}

pub async fn remove_config(State(state): State<AppState>, Query(query): Query<RemoveConfigQuery>) -> Result<Response, ApiError> {
    state.config.remove(&query.path)?;
    Ok(StatusCode::OK.into_response())
}

pub async fn schema() -> Json<Value> {
    Json(sqlrs_engine::config::schema())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_query_defaults_to_effective_and_root_path() {
        let query: GetConfigQuery = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(query.path, "");
        assert!(query.effective);
    }
}
