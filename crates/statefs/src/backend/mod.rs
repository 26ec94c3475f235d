pub mod btrfs;
pub mod copy;
pub mod overlay;

use std::path::Path;

use sqlrs_core::subprocess::{run_with_timeout, BTRFS_TIMEOUT};
use tokio::process::Command;

use crate::error::StateFsError;

/// Shared `mkdir -p`-equivalent used by every backend's `ensure_dir` before
/// it decides whether it also needs to create a subvolume on top.
pub(crate) async fn mkdir_all(path: &Path) -> Result<bool, StateFsError> {
    if path.exists() {
        return Ok(false);
    }
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| StateFsError::io(path, e))?;
    Ok(true)
}

pub(crate) async fn is_subvolume(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    let mut cmd = Command::new("btrfs");
    cmd.args(["subvolume", "show"]).arg(path);
    run_with_timeout(cmd, BTRFS_TIMEOUT, "btrfs subvolume show")
        .await
        .is_ok()
}

pub(crate) async fn rm_rf(path: &Path) -> Result<(), StateFsError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StateFsError::io(path, e)),
    }
}

pub(crate) async fn copy_recursive(src: &Path, dest: &Path) -> Result<(), StateFsError> {
    use sqlrs_core::subprocess::{run_with_timeout, COPY_TIMEOUT};
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StateFsError::io(parent, e))?;
    }
    let mut cmd = Command::new("cp");
    cmd.arg("-a").arg(src).arg(dest);
    run_with_timeout(cmd, COPY_TIMEOUT, "cp -a").await?;
    Ok(())
}
