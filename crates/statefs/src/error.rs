use std::path::PathBuf;

use sqlrs_core::subprocess::SubprocessError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateFsError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("subprocess failed: {0}")]
    Subprocess(#[from] SubprocessError),
    #[error("{root} is not usable as a state store root: {reason}")]
    InvalidRoot { root: PathBuf, reason: String },
    #[error("{path} is not a recognizable state store artifact")]
    NotOwned { path: PathBuf },
}

impl StateFsError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StateFsError::Io {
            path: path.into(),
            source,
        }
    }
}
