//! Engine-level errors (§7): validation failures at the planner boundary,
//! runtime/statefs failures, and the catalog errors they wrap.

use sqlrs_core::error::{Classify, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("cancelled")]
    Cancelled,
    #[error("runtime failure: {0}")]
    RuntimeFailure(String),
    #[error("catalog error: {0}")]
    Catalog(#[from] sqlrs_storage::CatalogError),
    #[error("statefs error: {0}")]
    StateFs(#[from] sqlrs_statefs::StateFsError),
}

impl Classify for EngineError {
    fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::RuntimeFailure(_) => ErrorKind::RuntimeFailure,
            EngineError::Catalog(e) => e.kind(),
            EngineError::StateFs(_) => ErrorKind::RuntimeFailure,
        }
    }
}

impl EngineError {
    pub fn to_error_body(&self) -> sqlrs_core::error::ErrorBody {
        sqlrs_core::error::ErrorBody::new(self.kind(), self.to_string())
    }
}
