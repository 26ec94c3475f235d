//! `btrfs` backend (§4.3): `requires_db_stop=false`,
//! `supports_writable_clone=true`. Snapshots and clones are real btrfs
//! subvolume snapshots, so `Snapshot` is atomic and `Clone` is cheap
//! copy-on-write regardless of data directory size.

use std::path::Path;

use async_trait::async_trait;
use sqlrs_core::subprocess::{run_with_timeout, BTRFS_TIMEOUT, FINDMNT_TIMEOUT};
use tokio::process::Command;

use crate::backend::{is_subvolume, rm_rf};
use crate::capabilities::Capabilities;
use crate::clone_guard::{CleanupAction, CloneGuard};
use crate::error::StateFsError;
use crate::StateFs;

#[derive(Debug, Default, Clone, Copy)]
pub struct BtrfsStateFs;

impl BtrfsStateFs {
    pub fn new() -> Self {
        Self
    }

    async fn create_subvolume(&self, path: &Path) -> Result<(), StateFsError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StateFsError::io(parent, e))?;
        }
        let mut cmd = Command::new("btrfs");
        cmd.args(["subvolume", "create"]).arg(path);
        run_with_timeout(cmd, BTRFS_TIMEOUT, "btrfs subvolume create").await?;
        Ok(())
    }
}

#[async_trait]
impl StateFs for BtrfsStateFs {
    fn capabilities(&self) -> Capabilities {
        Capabilities::BTRFS
    }

    async fn validate(&self, root: &Path) -> Result<(), StateFsError> {
        if !root.exists() {
            return Err(StateFsError::InvalidRoot {
                root: root.to_path_buf(),
                reason: "does not exist".into(),
            });
        }
        let mut cmd = Command::new("findmnt");
        cmd.args(["-n", "-o", "FSTYPE", "-T"]).arg(root);
        let fstype = run_with_timeout(cmd, FINDMNT_TIMEOUT, "findmnt")
            .await
            .map_err(|e| StateFsError::InvalidRoot {
                root: root.to_path_buf(),
                reason: e.to_string(),
            })?;
        if fstype.trim() != "btrfs" {
            return Err(StateFsError::InvalidRoot {
                root: root.to_path_buf(),
                reason: format!("not a btrfs mount (found {:?})", fstype.trim()),
            });
        }
        Ok(())
    }

    async fn ensure_dir(&self, path: &Path) -> Result<bool, StateFsError> {
        if path.exists() {
            return Ok(false);
        }
        self.create_subvolume(path).await?;
        Ok(true)
    }

    async fn clone_dir(&self, src: &Path, dest: &Path) -> Result<CloneGuard, StateFsError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StateFsError::io(parent, e))?;
        }
        let mut cmd = Command::new("btrfs");
        cmd.args(["subvolume", "snapshot"]).arg(src).arg(dest);
        run_with_timeout(cmd, BTRFS_TIMEOUT, "btrfs subvolume snapshot").await?;
        Ok(CloneGuard::new(dest.to_path_buf(), CleanupAction::RemoveDir))
    }

    async fn snapshot(&self, src: &Path, dest: &Path) -> Result<(), StateFsError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StateFsError::io(parent, e))?;
        }
        let mut cmd = Command::new("btrfs");
        cmd.args(["subvolume", "snapshot", "-r"]).arg(src).arg(dest);
        run_with_timeout(cmd, BTRFS_TIMEOUT, "btrfs subvolume snapshot -r").await?;
        Ok(())
    }

    async fn remove_path(&self, path: &Path) -> Result<(), StateFsError> {
        if is_subvolume(path).await {
            let mut cmd = Command::new("btrfs");
            cmd.args(["subvolume", "delete"]).arg(path);
            match run_with_timeout(cmd, BTRFS_TIMEOUT, "btrfs subvolume delete").await {
                Ok(_) => return Ok(()),
                Err(_) => return rm_rf(path).await,
            }
        }
        rm_rf(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_match_spec() {
        let caps = BtrfsStateFs::new().capabilities();
        assert!(!caps.requires_db_stop);
        assert!(caps.supports_writable_clone);
        assert!(caps.supports_send_receive);
    }
}
