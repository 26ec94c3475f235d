//! `overlayfs` backend (§4.3): `requires_db_stop=true` — the overlay
//! upper/lower pair must be quiesced before the merged view is copied out,
//! since overlayfs itself gives no point-in-time consistency guarantee.

use std::path::Path;

use async_trait::async_trait;
use sqlrs_core::subprocess::{run_with_timeout, MOUNT_TIMEOUT};
use tokio::process::Command;

use crate::backend::{copy_recursive, mkdir_all, rm_rf};
use crate::capabilities::Capabilities;
use crate::clone_guard::{CleanupAction, CloneGuard};
use crate::error::StateFsError;
use crate::layout::merged_dir;
use crate::StateFs;

#[derive(Debug, Default, Clone, Copy)]
pub struct OverlayStateFs;

impl OverlayStateFs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StateFs for OverlayStateFs {
    fn capabilities(&self) -> Capabilities {
        Capabilities::OVERLAY
    }

    async fn validate(&self, root: &Path) -> Result<(), StateFsError> {
        if !root.exists() {
            return Err(StateFsError::InvalidRoot {
                root: root.to_path_buf(),
                reason: "does not exist".into(),
            });
        }
        let meta = tokio::fs::metadata(root)
            .await
            .map_err(|e| StateFsError::io(root, e))?;
        if meta.permissions().readonly() {
            return Err(StateFsError::InvalidRoot {
                root: root.to_path_buf(),
                reason: "not writable".into(),
            });
        }
        Ok(())
    }

    async fn ensure_dir(&self, path: &Path) -> Result<bool, StateFsError> {
        mkdir_all(path).await
    }

    /// Mounts a fresh `upperdir`/`workdir` pair over `src` as the lower
    /// layer, presenting the writable merged view at `dest/merged`.
    async fn clone_dir(&self, src: &Path, dest: &Path) -> Result<CloneGuard, StateFsError> {
        let upper = dest.join("upper");
        let work = dest.join("work");
        let merged = merged_dir(dest);
        for dir in [&upper, &work, &merged] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StateFsError::io(dir, e))?;
        }

        let opts = format!(
            "lowerdir={},upperdir={},workdir={}",
            src.display(),
            upper.display(),
            work.display()
        );
        let mut cmd = Command::new("mount");
        cmd.args(["-t", "overlay", "overlay", "-o", &opts])
            .arg(&merged);
        if let Err(e) = run_with_timeout(cmd, MOUNT_TIMEOUT, "mount -t overlay").await {
            let _ = rm_rf(dest).await;
            return Err(e.into());
        }

        Ok(CloneGuard::new(dest.to_path_buf(), CleanupAction::Unmount))
    }

    /// Copies the merged (lower+upper) view into `dest`, committed via
    /// `rename` so a crash mid-copy never leaves a partial snapshot
    /// visible at `dest`.
    async fn snapshot(&self, src: &Path, dest: &Path) -> Result<(), StateFsError> {
        let tmp = dest.with_extension("tmp");
        let _ = rm_rf(&tmp).await;
        copy_recursive(src, &tmp).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StateFsError::io(parent, e))?;
        }
        tokio::fs::rename(&tmp, dest)
            .await
            .map_err(|e| StateFsError::io(dest, e))?;
        Ok(())
    }

    async fn remove_path(&self, path: &Path) -> Result<(), StateFsError> {
        let merged = merged_dir(path);
        if merged.exists() {
            let mut cmd = Command::new("umount");
            cmd.arg(&merged);
            let _ = run_with_timeout(cmd, MOUNT_TIMEOUT, "umount").await;
        }
        rm_rf(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_match_spec() {
        let caps = OverlayStateFs::new().capabilities();
        assert!(caps.requires_db_stop);
        assert!(caps.supports_writable_clone);
        assert!(!caps.supports_send_receive);
    }
}
