//! Plain-copy backend (§4.3): `requires_db_stop=true`,
//! `supports_writable_clone=false`. The fallback backend for hosts without
//! btrfs or overlayfs support — correct everywhere, cheapest nowhere.

use std::path::Path;

use async_trait::async_trait;

use crate::backend::{copy_recursive, mkdir_all, rm_rf};
use crate::capabilities::Capabilities;
use crate::clone_guard::{CleanupAction, CloneGuard};
use crate::error::StateFsError;
use crate::StateFs;

#[derive(Debug, Default, Clone, Copy)]
pub struct CopyStateFs;

impl CopyStateFs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StateFs for CopyStateFs {
    fn capabilities(&self) -> Capabilities {
        Capabilities::COPY
    }

    async fn validate(&self, root: &Path) -> Result<(), StateFsError> {
        if !root.exists() {
            return Err(StateFsError::InvalidRoot {
                root: root.to_path_buf(),
                reason: "does not exist".into(),
            });
        }
        let probe = root.join(".sqlrs-write-probe");
        tokio::fs::write(&probe, b"")
            .await
            .map_err(|_| StateFsError::InvalidRoot {
                root: root.to_path_buf(),
                reason: "not writable".into(),
            })?;
        let _ = tokio::fs::remove_file(&probe).await;
        Ok(())
    }

    async fn ensure_dir(&self, path: &Path) -> Result<bool, StateFsError> {
        mkdir_all(path).await
    }

    async fn clone_dir(&self, src: &Path, dest: &Path) -> Result<CloneGuard, StateFsError> {
        copy_recursive(src, dest).await?;
        Ok(CloneGuard::new(dest.to_path_buf(), CleanupAction::RemoveDir))
    }

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
        rm_rf(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_match_spec() {
        let caps = CopyStateFs::new().capabilities();
        assert!(caps.requires_db_stop);
        assert!(!caps.supports_writable_clone);
        assert!(!caps.supports_send_receive);
    }
}
