//! Default path resolution shared by the daemon and the CLI (§6.4, §6.5).

use std::env;
use std::path::PathBuf;

/// `SQLRS_STATE_STORE`, falling back to the platform state dir
/// (`~/.local/state/sqlrs` on Linux via the `dirs` crate's XDG resolution).
pub fn state_store_root() -> PathBuf {
    if let Ok(dir) = env::var("SQLRS_STATE_STORE") {
        return PathBuf::from(dir);
    }
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(env::temp_dir)
        .join("sqlrs")
}

pub fn catalog_wal_path(root: &std::path::Path) -> PathBuf {
    root.join("state.db")
}

pub fn catalog_snapshot_path(root: &std::path::Path) -> PathBuf {
    root.join("state.db.snapshot")
}

pub fn config_path(root: &std::path::Path) -> PathBuf {
    root.join("config.json")
}

pub fn tombstones_path(root: &std::path::Path) -> PathBuf {
    root.join("tombstones.jsonl")
}

pub fn engines_dir(root: &std::path::Path) -> PathBuf {
    root.join("engines")
}

pub fn jobs_dir(root: &std::path::Path) -> PathBuf {
    root.join("jobs")
}

pub fn logs_dir(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join("logs")
}

pub fn engine_json_path(run_dir: &std::path::Path) -> PathBuf {
    run_dir.join("engine.json")
}

pub fn daemon_lock_path(run_dir: &std::path::Path) -> PathBuf {
    run_dir.join("daemon.lock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins() {
        // SAFETY (test-only, serialized by the harness running this crate's
        // tests single-threaded for env-mutating cases): no concurrent
        // access to SQLRS_STATE_STORE within this process.
        env::set_var("SQLRS_STATE_STORE", "/tmp/sqlrs-test-root");
        assert_eq!(state_store_root(), PathBuf::from("/tmp/sqlrs-test-root"));
        env::remove_var("SQLRS_STATE_STORE");
    }
}
