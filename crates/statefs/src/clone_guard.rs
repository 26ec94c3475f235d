//! RAII guard returned by [`crate::StateFs::clone_dir`] (design note in
//! spec §9: "the `CloneResult` cleanup closure maps to an RAII guard").

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::StateFsError;

#[derive(Debug, Clone, Copy)]
pub(crate) enum CleanupAction {
    RemoveDir,
    Unmount,
}

/// Owns the writable clone produced by `clone_dir`. Call [`Self::release`]
/// to tear it down explicitly (the common case: the job failed, or the
/// clone was only needed transiently to produce a snapshot). Call
/// [`Self::keep`] when the clone should survive past this guard (e.g. it
/// became an instance's `runtime_dir`). Dropping without either performs a
/// best-effort synchronous cleanup and logs a warning — it is not a
/// substitute for calling `release`.
#[must_use = "a CloneGuard must be released or kept, or its clone leaks until drop"]
pub struct CloneGuard {
    path: PathBuf,
    action: Option<CleanupAction>,
}

impl CloneGuard {
    pub(crate) fn new(path: PathBuf, action: CleanupAction) -> Self {
        CloneGuard {
            path,
            action: Some(action),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Disarms cleanup and returns the clone's path for long-term use.
    pub fn keep(mut self) -> PathBuf {
        self.action = None;
        std::mem::take(&mut self.path)
    }

    /// Explicitly tears down the clone (unmount if applicable, then remove
    /// the directory).
    pub async fn release(mut self) -> Result<(), StateFsError> {
        if let Some(action) = self.action.take() {
            run_cleanup(&self.path, action).await?;
        }
        Ok(())
    }
}

async fn run_cleanup(path: &Path, action: CleanupAction) -> Result<(), StateFsError> {
    if matches!(action, CleanupAction::Unmount) {
        let mut cmd = tokio::process::Command::new("umount");
        cmd.arg(path);
        let _ = sqlrs_core::subprocess::run_with_timeout(
            cmd,
            sqlrs_core::subprocess::MOUNT_TIMEOUT,
            "umount",
        )
        .await;
    }
    tokio::fs::remove_dir_all(path)
        .await
        .or_else(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Ok(())
            } else {
                Err(e)
            }
        })
        .map_err(|e| StateFsError::io(path, e))
}

impl Drop for CloneGuard {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            let path = self.path.clone();
            warn!(path = %path.display(), "clone guard dropped without release, cleaning up best-effort");
            if matches!(action, CleanupAction::Unmount) {
                let _ = std::process::Command::new("umount").arg(&path).status();
            }
            let _ = std::fs::remove_dir_all(&path);
        }
    }
}
