//! The embedded transactional catalog (§4.2): a single-writer WAL-backed
//! store for `states`, `instances`, `names`, `prepare_jobs`,
//! `prepare_tasks`, and `prepare_events`, opened once per daemon process
//! and shared behind an `Arc` by every collaborator that reads or writes
//! it (Prepare Coordinator, Deletion Planner, the HTTP API's query
//! handlers).

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sqlrs_core::paths::{catalog_snapshot_path, catalog_wal_path};
use tracing::info;

use crate::error::CatalogError;
use crate::event::CatalogEvent;
use crate::snapshot::Snapshot;
use crate::state::MaterializedState;
use crate::wal::Wal;

pub(crate) struct CatalogInner {
    pub(crate) wal: Wal,
    pub(crate) state: MaterializedState,
}

pub struct Catalog {
    pub(crate) inner: Mutex<CatalogInner>,
    root: PathBuf,
}

impl Catalog {
    /// Opens (or creates) the catalog at `<root>/state.db`. Loads the last
    /// snapshot if present, then replays every WAL entry after it — the
    /// same recovery path run whether the prior shutdown was clean or a
    /// crash (§8 scenario 6).
    pub fn open(root: &Path) -> Result<Self, CatalogError> {
        std::fs::create_dir_all(root)
            .map_err(|e| CatalogError::InvalidArgument(format!("cannot create {:?}: {e}", root)))?;

        let snapshot_path = catalog_snapshot_path(root);
        let (processed_seq, mut state) = match Snapshot::load(&snapshot_path)? {
            Some(snap) => (snap.seq, snap.state),
            None => (0, MaterializedState::new()),
        };

        let mut wal = Wal::open(&catalog_wal_path(root), processed_seq)?;
        let entries = wal.entries_after(processed_seq)?;
        let replayed = entries.len();
        for entry in entries {
            state.apply(entry.event);
        }
        if replayed > 0 {
            info!(replayed, from_seq = processed_seq, "replayed WAL entries at catalog open");
        }

        Ok(Catalog {
            inner: Mutex::new(CatalogInner { wal, state }),
            root: root.to_path_buf(),
        })
    }

    pub(crate) fn commit(&self, event: CatalogEvent) -> Result<(), CatalogError> {
        let mut inner = self.inner.lock();
        inner.wal.append(&event)?;
        inner.wal.flush()?;
        inner.state.apply(event);
        Ok(())
    }

    /// Writes a fresh snapshot and truncates the WAL up to the sequence it
    /// reflects. Safe to call at any time (e.g. from an idle-timer tick);
    /// a crash mid-checkpoint just means recovery replays a few more WAL
    /// entries next time.
    pub fn checkpoint(&self) -> Result<(), CatalogError> {
        let (seq, state) = {
            let mut inner = self.inner.lock();
            inner.wal.flush()?;
            (inner.wal.write_seq(), inner.state.clone())
        };
        let snapshot = Snapshot::new(seq, state);
        snapshot.save(&catalog_snapshot_path(&self.root))?;
        self.inner.lock().wal.truncate_before(seq + 1)?;
        Ok(())
    }
}

/// `id_prefix` filters require >=8 hex characters (§8 Boundary behaviors),
/// lowercased before matching.
pub fn normalize_id_prefix(raw: &str) -> Result<String, CatalogError> {
    let lower = raw.to_ascii_lowercase();
    if lower.len() < 8 || !lower.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CatalogError::InvalidArgument(
            "id_prefix must be at least 8 hex characters".into(),
        ));
    }
    Ok(lower)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_prefix() {
        assert!(normalize_id_prefix("abc123").is_err());
    }

    #[test]
    fn rejects_non_hex_prefix() {
        assert!(normalize_id_prefix("zzzzzzzz").is_err());
    }

    #[test]
    fn lowercases_valid_prefix() {
        assert_eq!(normalize_id_prefix("ABCDEF12").unwrap(), "abcdef12");
    }
}
