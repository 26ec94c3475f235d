//! Snapshot persistence for crash recovery (§8 invariant 1: after startup
//! recovery, the on-disk state directories and the `states` table agree).
//!
//! A snapshot is the complete [`MaterializedState`] plus the WAL sequence
//! number it reflects. Recovery loads the snapshot, then replays WAL
//! entries with `seq` greater than that number.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::MaterializedState;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("compression error: {0}")]
    Compress(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub seq: u64,
    pub state: MaterializedState,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(seq: u64, state: MaterializedState) -> Self {
        Snapshot {
            seq,
            state,
            created_at: Utc::now(),
        }
    }

    /// Serializes to zstd-compressed JSON and commits via `tmp + rename`,
    /// fsyncing the temp file before the rename so a crash mid-write never
    /// corrupts the previous snapshot.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        {
            let json = serde_json::to_vec(self)?;
            let compressed =
                zstd::encode_all(&json[..], 3).map_err(|e| SnapshotError::Compress(e.to_string()))?;
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&compressed)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Loads the snapshot if present. A corrupt snapshot is rotated to
    /// `.bak` and `Ok(None)` is returned so the caller falls back to
    /// replaying the WAL from scratch.
    pub fn load(path: &Path) -> Result<Option<Self>, SnapshotError> {
        if !path.exists() {
            return Ok(None);
        }
        let compressed = {
            let file = File::open(path)?;
            let mut reader = BufReader::new(file);
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf)?;
            buf
        };
        let decoded = match zstd::decode_all(&compressed[..]) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "corrupt snapshot, starting fresh");
                let bak = rotate_bak_path(path);
                fs::rename(path, bak)?;
                return Ok(None);
            }
        };
        match serde_json::from_slice(&decoded) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "corrupt snapshot, starting fresh");
                let bak = rotate_bak_path(path);
                fs::rename(path, bak)?;
                Ok(None)
            }
        }
    }
}

const MAX_BAK_FILES: u32 = 3;

pub(crate) fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };
    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }
    bak(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db.snapshot");
        let snap = Snapshot::new(42, MaterializedState::new());
        snap.save(&path).unwrap();
        let loaded = Snapshot::load(&path).unwrap().unwrap();
        assert_eq!(loaded.seq, 42);
    }

    #[test]
    fn missing_file_returns_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.snapshot");
        assert!(Snapshot::load(&path).unwrap().is_none());
    }

    #[test]
    fn corrupt_snapshot_rotates_to_bak() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db.snapshot");
        fs::write(&path, b"not zstd json").unwrap();
        let loaded = Snapshot::load(&path).unwrap();
        assert!(loaded.is_none());
        assert!(path.with_extension("bak").exists());
    }
}
