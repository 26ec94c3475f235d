//! Snapshot migration registry for schema evolution (§4.2: "Schema managed
//! by idempotent DDL... missing columns added via guarded ALTER TABLE").
//!
//! Since the catalog is a JSON-shaped snapshot rather than literal SQL,
//! schema evolution is expressed as JSON-to-JSON migrations keyed by the
//! `v` field, chained to reach [`crate::CURRENT_SNAPSHOT_VERSION`].

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration v{from}->v{to} failed: {reason}")]
    Failed { from: u32, to: u32, reason: String },
    #[error("no migration path from v{0} to v{1}")]
    NoPath(u32, u32),
    #[error("snapshot version {0} is newer than supported ({1})")]
    TooNew(u32, u32),
}

pub trait Migration: Send + Sync {
    fn source_version(&self) -> u32;
    fn target_version(&self) -> u32;
    fn migrate(&self, snapshot: &mut Value) -> Result<(), MigrationError>;
}

/// Chains registered migrations to bring a snapshot JSON document up to
/// `target`. Running this twice against an already-current document is a
/// no-op (§8 "Idempotence: Schema migration executed twice is a no-op").
pub struct MigrationRegistry {
    migrations: Vec<Box<dyn Migration>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        MigrationRegistry {
            migrations: Vec::new(),
        }
    }

    pub fn migrate_to(&self, mut snapshot: Value, target: u32) -> Result<Value, MigrationError> {
        let current = snapshot.get("v").and_then(|v| v.as_u64()).unwrap_or(1) as u32;
        if current == target {
            return Ok(snapshot);
        }
        if current > target {
            return Err(MigrationError::TooNew(current, target));
        }
        let mut version = current;
        while version < target {
            let migration = self
                .migrations
                .iter()
                .find(|m| m.source_version() == version)
                .ok_or(MigrationError::NoPath(version, target))?;
            migration.migrate(&mut snapshot)?;
            version = migration.target_version();
            if let Some(obj) = snapshot.as_object_mut() {
                obj.insert("v".into(), version.into());
            }
        }
        Ok(snapshot)
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_version_is_a_no_op() {
        let registry = MigrationRegistry::new();
        let snap = serde_json::json!({"v": 1, "states": {}});
        let migrated = registry.migrate_to(snap.clone(), 1).unwrap();
        assert_eq!(migrated, snap);
    }

    #[test]
    fn newer_than_supported_errors() {
        let registry = MigrationRegistry::new();
        let snap = serde_json::json!({"v": 5});
        assert!(matches!(
            registry.migrate_to(snap, 1),
            Err(MigrationError::TooNew(5, 1))
        ));
    }
}
