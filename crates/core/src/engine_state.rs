//! `engine.json` (§6.1): the daemon's one process-wide shared artifact.
//! Written atomically (tmp + rename, previous file removed first to
//! tolerate Windows rename-over-existing-file semantics) with mode 0600.
//! The daemon writes it at startup and removes it on clean shutdown; the
//! CLI's orchestrator reads it for discovery — both sides live in this
//! crate so neither binary depends on the other.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::paths::engine_json_path;
use crate::proto::EngineState;

#[derive(Debug, Error)]
pub enum EngineStateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed engine.json: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn write(run_dir: &Path, state: &EngineState) -> Result<(), EngineStateError> {
    fs::create_dir_all(run_dir)?;
    let path = engine_json_path(run_dir);
    let tmp = path.with_extension("tmp");
    let json = serde_json::to_vec_pretty(state)?;
    fs::write(&tmp, json)?;
    let _ = fs::remove_file(&path);
    fs::rename(&tmp, &path)?;
    set_owner_only_permissions(&path)?;
    Ok(())
}

pub fn read(run_dir: &Path) -> Result<EngineState, EngineStateError> {
    let raw = fs::read_to_string(engine_json_path(run_dir))?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn remove(run_dir: &Path) {
    let _ = fs::remove_file(engine_json_path(run_dir));
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<(), EngineStateError> {
    use std::os::unix::fs::PermissionsExt;
    let perms = fs::Permissions::from_mode(0o600);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<(), EngineStateError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample() -> EngineState {
        EngineState {
            endpoint: "127.0.0.1:4821".into(),
            pid: std::process::id(),
            started_at: Utc::now(),
            auth_token: "tok-123".into(),
            version: "0.1.0".into(),
            instance_id: "inst-abc".into(),
        }
    }

    #[test]
    fn round_trips_observable_fields() {
        let dir = tempdir().unwrap();
        let state = sample();
        write(dir.path(), &state).unwrap();
        let read_back = read(dir.path()).unwrap();
        assert_eq!(read_back.endpoint, state.endpoint);
        assert_eq!(read_back.pid, state.pid);
        assert_eq!(read_back.auth_token, state.auth_token);
        assert_eq!(read_back.instance_id, state.instance_id);
        assert_eq!(read_back.version, state.version);
    }

    #[test]
    fn write_twice_succeeds_despite_existing_file() {
        let dir = tempdir().unwrap();
        write(dir.path(), &sample()).unwrap();
        write(dir.path(), &sample()).unwrap();
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempdir().unwrap();
        write(dir.path(), &sample()).unwrap();
        remove(dir.path());
        remove(dir.path());
        assert!(read(dir.path()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        write(dir.path(), &sample()).unwrap();
        let meta = fs::metadata(engine_json_path(dir.path())).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}
