//! The `axum` translation layer (§6.2): bearer auth (everywhere but
//! `/v1/health`), NDJSON content negotiation for list endpoints, and one
//! handler module per resource family.

mod config;
mod health;
mod instances;
mod names;
mod prepare_jobs;
mod runs;
mod states;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(health::health))
        .route("/v1/names", get(names::list_names))
        .route("/v1/names/:name", get(names::get_name))
        .route("/v1/instances", get(instances::list_instances))
        .route(
            "/v1/instances/:instance_ref",
            get(instances::get_instance).delete(instances::delete_instance),
        )
        .route("/v1/states", get(states::list_states))
        .route("/v1/states/:state_id", get(states::get_state).delete(states::delete_state))
        .route(
            "/v1/prepare-jobs",
            post(prepare_jobs::submit).get(prepare_jobs::list),
        )
        .route(
            "/v1/prepare-jobs/:job_id",
            get(prepare_jobs::get).delete(prepare_jobs::delete),
        )
        .route("/v1/prepare-jobs/:job_id/events", get(prepare_jobs::events))
        .route("/v1/prepare-jobs/:job_id/cancel", post(prepare_jobs::cancel))
        .route("/v1/runs", post(runs::run))
        .route(
            "/v1/config",
            get(config::get_config).patch(config::set_config).delete(config::remove_config),
        )
        .route("/v1/config/schema", get(config::schema))
        .layer(middleware::from_fn_with_state(state.clone(), auth))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bearer-auth middleware (§6.2 "Bearer auth required for all endpoints
/// except `GET /v1/health`"); also touches the idle-activity clock the
/// ticker in [`crate::idle`] reads, so any serviced request resets it.
async fn auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if request.uri().path() == "/v1/health" {
        return Ok(next.run(request).await);
    }

    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == state.auth_token => {
            state.touch_activity();
            Ok(next.run(request).await)
        }
        _ => Err(ApiError::unauthorized("missing or invalid bearer token")),
    }
}

/// True when the request prefers NDJSON for list responses (§6.2).
pub(crate) fn wants_ndjson(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/x-ndjson"))
}

/// Renders a list either as a JSON array or, when the caller asked for it,
/// as one compact JSON object per line with `application/x-ndjson`.
pub(crate) fn list_response<T: serde::Serialize>(headers: &HeaderMap, items: Vec<T>) -> Response {
    use axum::response::IntoResponse;
    if wants_ndjson(headers) {
        let mut body = String::new();
        for item in &items {
            if let Ok(line) = serde_json::to_string(item) {
                body.push_str(&line);
                body.push('\n');
            }
        }
        (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "application/x-ndjson")],
            body,
        )
            .into_response()
    } else {
        (StatusCode::OK, axum::Json(items)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wants_ndjson_detects_accept_header() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::ACCEPT, "application/x-ndjson".parse().unwrap());
        assert!(wants_ndjson(&headers));
    }

    #[test]
    fn wants_ndjson_false_by_default() {
        assert!(!wants_ndjson(&HeaderMap::new()));
    }
}
