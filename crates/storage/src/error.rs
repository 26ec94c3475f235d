use sqlrs_core::error::{Classify, ErrorKind};
use thiserror::Error;

use crate::snapshot::SnapshotError;
use crate::wal::WalError;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Classify for CatalogError {
    fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::Wal(_) | CatalogError::Snapshot(_) => ErrorKind::Internal,
            CatalogError::NotFound(_) => ErrorKind::NotFound,
            CatalogError::Conflict(_) => ErrorKind::Conflict,
            CatalogError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }
}
