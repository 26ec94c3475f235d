//! The error taxonomy (§7) shared by every crate's `thiserror` error enum.
//!
//! Each crate's own error type answers `fn kind(&self) -> ErrorKind`; the
//! daemon's `ApiError` is the single place that turns an `ErrorKind` into an
//! HTTP status, matching this crate's "single seam" convention.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Conflict,
    Cancelled,
    EngineRestart,
    RuntimeFailure,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::EngineRestart => "engine_restart",
            ErrorKind::RuntimeFailure => "runtime_failure",
            ErrorKind::Internal => "internal",
        }
    }
}

/// The wire shape of an error body (§6.2): `{code, message, details?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code().to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Implemented by every crate-local error enum so shared call sites (event
/// logging, the `error` event payload, `ApiError`) can classify any error
/// without matching on its concrete type.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_strings_match_spec_table() {
        assert_eq!(ErrorKind::InvalidArgument.code(), "invalid_argument");
        assert_eq!(ErrorKind::NotFound.code(), "not_found");
        assert_eq!(ErrorKind::Conflict.code(), "conflict");
        assert_eq!(ErrorKind::Cancelled.code(), "cancelled");
        assert_eq!(ErrorKind::EngineRestart.code(), "engine_restart");
        assert_eq!(ErrorKind::RuntimeFailure.code(), "runtime_failure");
        assert_eq!(ErrorKind::Internal.code(), "internal");
    }

    #[test]
    fn error_body_omits_details_when_absent() {
        let body = ErrorBody::new(ErrorKind::NotFound, "no such instance");
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("details").is_none());
    }
}
