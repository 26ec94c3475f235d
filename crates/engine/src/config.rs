//! Layered effective/override config document (§4.6, §6.2 `/v1/config`).
//!
//! `defaults()` is a fixed JSON document baked into the binary; overrides
//! are persisted at `<state_store_root>/config.json` and merged on top of
//! it dot-path by dot-path. `effective=false` reads only the override
//! layer (or `null` if unset at that path); `effective=true` (the
//! default) reads the merged view.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;

use sqlrs_core::error::{Classify, ErrorKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config path: {0}")]
    InvalidPath(String),
    #[error("no override set at {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Classify for ConfigError {
    fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::InvalidPath(_) => ErrorKind::InvalidArgument,
            ConfigError::NotFound(_) => ErrorKind::NotFound,
            ConfigError::Io(_) | ConfigError::Json(_) => ErrorKind::Internal,
        }
    }
}

/// Default values for every configurable knob this spec names (§1 component
/// table, §4.6, §6.5).
pub fn defaults() -> Value {
    serde_json::json!({
        "statefs": { "backend": "copy" },
        "runtime": { "wait_for_ready_timeout_secs": 30 },
        "orchestrator": {
            "idle_timeout_secs": 600,
            "startup_timeout_secs": 30,
        },
        "prepare": { "synchronous": false },
    })
}

pub fn schema() -> Value {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "statefs": {
                "type": "object",
                "properties": { "backend": { "type": "string", "enum": ["btrfs", "overlay", "copy"] } }
            },
            "runtime": {
                "type": "object",
                "properties": { "wait_for_ready_timeout_secs": { "type": "integer", "minimum": 1 } }
            },
            "orchestrator": {
                "type": "object",
                "properties": {
                    "idle_timeout_secs": { "type": "integer", "minimum": 0 },
                    "startup_timeout_secs": { "type": "integer", "minimum": 1 }
                }
            },
            "prepare": {
                "type": "object",
                "properties": { "synchronous": { "type": "boolean" } }
            }
        }
    })
}

pub struct Config {
    path: PathBuf,
    overrides: RwLock<Value>,
}

impl Config {
    /// Loads `<state_store_root>/config.json` if present, else starts with
    /// an empty override document.
    pub fn open(root: &Path) -> Result<Self, ConfigError> {
        let path = sqlrs_core::paths::config_path(root);
        let overrides = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            Value::Object(serde_json::Map::new())
        };
        Ok(Config {
            path,
            overrides: RwLock::new(overrides),
        })
    }

    /// `effective=true` merges `defaults()` with the override layer;
    /// `effective=false` reads only the override layer, returning `Value::Null`
    /// if nothing is set there.
    pub fn get(&self, path: &str, effective: bool) -> Result<Value, ConfigError> {
        let segments = split_path(path)?;
        if effective {
            let merged = merge(defaults(), self.overrides.read().clone());
            Ok(walk(&merged, &segments).cloned().unwrap_or(Value::Null))
        } else {
            Ok(walk(&self.overrides.read(), &segments).cloned().unwrap_or(Value::Null))
        }
    }

    pub fn set(&self, path: &str, value: Value) -> Result<(), ConfigError> {
        let segments = split_path(path)?;
        {
            let mut overrides = self.overrides.write();
            set_at(&mut overrides, &segments, value);
        }
        self.persist()
    }

    /// Removes the override at `path`; a subsequent `get(path, effective=true)`
    /// falls back to the merged default (§8 round-trip law).
    pub fn remove(&self, path: &str) -> Result<(), ConfigError> {
        let segments = split_path(path)?;
        {
            let mut overrides = self.overrides.write();
            remove_at(&mut overrides, &segments);
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), ConfigError> {
        let json = serde_json::to_vec_pretty(&*self.overrides.read())?;
        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn split_path(path: &str) -> Result<Vec<String>, ConfigError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    if path.starts_with('.') || path.ends_with('.') || path.contains("..") {
        return Err(ConfigError::InvalidPath(path.to_string()));
    }
    Ok(path.split('.').map(String::from).collect())
}

fn walk<'a>(value: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = value;
    for seg in segments {
        current = current.as_object()?.get(seg)?;
    }
    Some(current)
}

fn set_at(root: &mut Value, segments: &[String], new_value: Value) {
    if segments.is_empty() {
        *root = new_value;
        return;
    }
    if !root.is_object() {
        *root = Value::Object(serde_json::Map::new());
    }
    // Just coerced to `Value::Object` above when it wasn't one already.
    #[allow(clippy::expect_used)]
    let obj = root.as_object_mut().expect("just ensured object");
    let (head, rest) = (&segments[0], &segments[1..]);
    if rest.is_empty() {
        obj.insert(head.clone(), new_value);
    } else {
        let child = obj.entry(head.clone()).or_insert_with(|| Value::Object(serde_json::Map::new()));
        set_at(child, rest, new_value);
    }
}

fn remove_at(root: &mut Value, segments: &[String]) {
    if segments.is_empty() {
        return;
    }
    let Some(obj) = root.as_object_mut() else { return };
    let (head, rest) = (&segments[0], &segments[1..]);
    if rest.is_empty() {
        obj.remove(head);
    } else if let Some(child) = obj.get_mut(head) {
        remove_at(child, rest);
    }
}

fn merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                let merged = match base_map.remove(&k) {
                    Some(base_v) => merge(base_v, v),
                    None => v,
                };
                base_map.insert(k, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn effective_reads_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::open(dir.path()).unwrap();
        assert_eq!(
            config.get("statefs.backend", true).unwrap(),
            Value::String("copy".into())
        );
    }

    #[test]
    fn set_then_get_non_effective_round_trips() {
        let dir = tempdir().unwrap();
        let config = Config::open(dir.path()).unwrap();
        config.set("statefs.backend", Value::String("btrfs".into())).unwrap();
        assert_eq!(
            config.get("statefs.backend", false).unwrap(),
            Value::String("btrfs".into())
        );
        assert_eq!(
            config.get("statefs.backend", true).unwrap(),
            Value::String("btrfs".into())
        );
    }

    #[test]
    fn remove_restores_merged_default() {
        let dir = tempdir().unwrap();
        let config = Config::open(dir.path()).unwrap();
        config.set("statefs.backend", Value::String("btrfs".into())).unwrap();
        config.remove("statefs.backend").unwrap();
        assert_eq!(
            config.get("statefs.backend", true).unwrap(),
            Value::String("copy".into())
        );
        assert_eq!(config.get("statefs.backend", false).unwrap(), Value::Null);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let config = Config::open(dir.path()).unwrap();
            config.set("orchestrator.idle_timeout_secs", serde_json::json!(42)).unwrap();
        }
        let reopened = Config::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get("orchestrator.idle_timeout_secs", false).unwrap(),
            serde_json::json!(42)
        );
    }
}
