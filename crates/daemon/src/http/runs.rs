//! `POST /v1/runs` (§6.2, §4.4): thin wrapper over [`sqlrs_engine::Runner`],
//! rendered as an NDJSON event stream.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::extract::State;
use axum::Json;
use sqlrs_core::proto::RunRequest;

use crate::error::ApiError;
use crate::AppState;

pub async fn run(State(state): State<AppState>, Json(request): Json<RunRequest>) -> Result<Response, ApiError> {
    let events = state.runner.run(&request).await?;

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
