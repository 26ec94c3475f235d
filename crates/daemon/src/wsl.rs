//! WSL mount bootstrap precondition (§6.5): when `SQLRS_WSL_MOUNT_UNIT` and
//! `SQLRS_WSL_MOUNT_FSTYPE` are set, the state store root must sit on a
//! mounted filesystem of that type before the catalog is opened. A no-op
//! (and therefore inert on every host this crate is actually developed and
//! tested on) unless both variables are present.

use std::path::Path;

use sqlrs_core::subprocess::{run_with_timeout, SubprocessError, FINDMNT_TIMEOUT, SYSTEMCTL_TIMEOUT};
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

#[derive(Debug, Error)]
pub enum WslMountError {
    #[error("mount unit {unit} failed to start: {source}")]
    StartFailed { unit: String, source: SubprocessError },
    #[error("{root} is not mounted as {fstype} after starting {unit}")]
    StillNotMounted { root: String, fstype: String, unit: String },
}

/// No-op unless both `SQLRS_WSL_MOUNT_UNIT` and `SQLRS_WSL_MOUNT_FSTYPE` are
/// set in the environment.
pub async fn ensure_mounted(root: &Path) -> Result<(), WslMountError> {
    let (Ok(unit), Ok(fstype)) = (
        std::env::var("SQLRS_WSL_MOUNT_UNIT"),
        std::env::var("SQLRS_WSL_MOUNT_FSTYPE"),
    ) else {
        return Ok(());
    };

    if is_mounted_as(root, &fstype).await {
        return Ok(());
    }

    info!(%unit, %fstype, root = %root.display(), "mount precondition not met, starting unit");
    let mut cmd = Command::new("systemctl");
    cmd.args(["start", &unit]).kill_on_drop(true);
    run_with_timeout(cmd, SYSTEMCTL_TIMEOUT, "systemctl start")
        .await
        .map_err(|source| WslMountError::StartFailed { unit: unit.clone(), source })?;

    if is_mounted_as(root, &fstype).await {
        Ok(())
    } else {
        Err(WslMountError::StillNotMounted {
            root: root.display().to_string(),
            fstype,
            unit,
        })
    }
}

async fn is_mounted_as(root: &Path, fstype: &str) -> bool {
    let mut cmd = Command::new("findmnt");
    cmd.args(["-T", &root.to_string_lossy(), "-n", "-o", "FSTYPE"]).kill_on_drop(true);
    match run_with_timeout(cmd, FINDMNT_TIMEOUT, "findmnt").await {
        Ok(out) => out.trim() == fstype,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_env_vars_is_a_no_op() {
        // SAFETY (test-only): no concurrent access to these vars in this
        // process's test binary.
        std::env::remove_var("SQLRS_WSL_MOUNT_UNIT");
        std::env::remove_var("SQLRS_WSL_MOUNT_FSTYPE");
        assert!(ensure_mounted(Path::new("/tmp")).await.is_ok());
    }
}
