//! `ApiError`: the single seam where an `ErrorKind` becomes an HTTP status
//! and body (§7, §9.2). Every handler returns `Result<_, ApiError>`; no
//! handler matches on status codes itself.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sqlrs_core::error::{Classify, ErrorBody, ErrorKind};
use sqlrs_engine::EngineError;

#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    body: ErrorBody,
    status_override: Option<StatusCode>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let body = ErrorBody::new(kind, message);
        ApiError { kind, body, status_override: None }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Bearer-auth failures (§6.2): an `InvalidArgument`-shaped body, but
    /// 401 rather than 400 — the one case the kind-to-status mapping alone
    /// can't express.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::InvalidArgument, message);
        err.status_override = Some(StatusCode::UNAUTHORIZED);
        err
    }

    fn status(&self) -> StatusCode {
        if let Some(status) = self.status_override {
            return status;
        }
        match self.kind {
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            // §7: cancelled/engine_restart never surface as API errors on
            // their own — they are job-terminal error bodies, not HTTP
            // failures of the request that observed them.
            ErrorKind::Cancelled | ErrorKind::EngineRestart => StatusCode::OK,
            ErrorKind::RuntimeFailure | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError {
            kind: e.kind(),
            body: e.to_error_body(),
        }
    }
}

impl From<sqlrs_storage::CatalogError> for ApiError {
    fn from(e: sqlrs_storage::CatalogError) -> Self {
        ApiError {
            kind: e.kind(),
            body: ErrorBody::new(e.kind(), e.to_string()),
        }
    }
}

impl From<sqlrs_engine::ConfigError> for ApiError {
    fn from(e: sqlrs_engine::ConfigError) -> Self {
        ApiError {
            kind: e.kind(),
            body: ErrorBody::new(e.kind(), e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = ApiError::not_found("no such instance");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_argument_maps_to_400() {
        let err = ApiError::invalid_argument("bad id_prefix");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unauthorized_maps_to_401() {
        let err = ApiError::unauthorized("missing bearer token");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
