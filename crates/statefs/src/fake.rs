//! In-memory-ish [`StateFs`] for tests elsewhere in the workspace: real
//! directories on disk (so callers can still `read_dir`/assert on file
//! contents) but driven by plain `std::fs`, never `btrfs`/`mount`/`cp`
//! subprocesses, so it runs in any sandbox.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::capabilities::Capabilities;
use crate::clone_guard::{CleanupAction, CloneGuard};
use crate::error::StateFsError;
use crate::StateFs;

pub struct FakeStateFs {
    caps: Capabilities,
    pub removed: Mutex<Vec<std::path::PathBuf>>,
}

impl FakeStateFs {
    pub fn new(caps: Capabilities) -> Self {
        FakeStateFs {
            caps,
            removed: Mutex::new(Vec::new()),
        }
    }
}

impl Default for FakeStateFs {
    fn default() -> Self {
        Self::new(Capabilities::COPY)
    }
}

fn copy_dir_all(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let dest_path = dest.join(entry.file_name());
        if ty.is_dir() {
            copy_dir_all(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), dest_path)?;
        }
    }
    Ok(())
}

#[async_trait]
impl StateFs for FakeStateFs {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    async fn validate(&self, root: &Path) -> Result<(), StateFsError> {
        if root.exists() {
            Ok(())
        } else {
            Err(StateFsError::InvalidRoot {
                root: root.to_path_buf(),
                reason: "does not exist".into(),
            })
        }
    }

    async fn ensure_dir(&self, path: &Path) -> Result<bool, StateFsError> {
        if path.exists() {
            return Ok(false);
        }
        std::fs::create_dir_all(path).map_err(|e| StateFsError::io(path, e))?;
        Ok(true)
    }

    async fn clone_dir(&self, src: &Path, dest: &Path) -> Result<CloneGuard, StateFsError> {
        copy_dir_all(src, dest).map_err(|e| StateFsError::io(dest, e))?;
        Ok(CloneGuard::new(dest.to_path_buf(), CleanupAction::RemoveDir))
    }

    async fn snapshot(&self, src: &Path, dest: &Path) -> Result<(), StateFsError> {
        let tmp = dest.with_extension("tmp");
        let _ = std::fs::remove_dir_all(&tmp);
        copy_dir_all(src, &tmp).map_err(|e| StateFsError::io(&tmp, e))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StateFsError::io(parent, e))?;
        }
        std::fs::rename(&tmp, dest).map_err(|e| StateFsError::io(dest, e))?;
        Ok(())
    }

    async fn remove_path(&self, path: &Path) -> Result<(), StateFsError> {
        self.removed.lock().unwrap_or_else(|e| e.into_inner()).push(path.to_path_buf());
        match std::fs::remove_dir_all(path) {
            Ok(()) | Err(_) if !path.exists() => Ok(()),
            Err(e) => Err(StateFsError::io(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn clone_then_snapshot_round_trips_contents() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("PG_VERSION"), b"15").unwrap();

        let fs = FakeStateFs::default();
        let clone_dest = dir.path().join("clone");
        let guard = fs.clone_dir(&src, &clone_dest).await.unwrap();

        let snap_dest = dir.path().join("snap");
        fs.snapshot(guard.path(), &snap_dest).await.unwrap();
        assert_eq!(
            std::fs::read(snap_dest.join("PG_VERSION")).unwrap(),
            b"15"
        );

        guard.release().await.unwrap();
        assert!(!clone_dest.exists());
    }
}
