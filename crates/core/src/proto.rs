//! Wire DTOs shared by the daemon's HTTP layer and the CLI client (§6.2,
//! §6.1). Kept in `core` so both sides depend on one copy of the truth,
//! the same way this crate keeps its request/response wire types in one
//! place shared by server and client binaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorBody;
use crate::id::{InstanceId, JobId, StateId};
use crate::model::{InstanceStatus, JobStatus, PrepareKind};

/// `engine.json` (§6.1). Field names are camelCase on the wire to match the
/// spec's literal JSON shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub endpoint: String,
    pub pid: u32,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "authToken")]
    pub auth_token: String,
    pub version: String,
    #[serde(rename = "instanceId")]
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub version: String,
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    pub pid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub prepare_kind: PrepareKind,
    pub image_id: String,
    #[serde(default)]
    pub plan_only: bool,
    #[serde(default = "crate::model::PrepareJob::default_snapshot_mode")]
    pub snapshot_mode: String,
    #[serde(default)]
    pub psql_args: Vec<String>,
    #[serde(default)]
    pub liquibase_changelog: Option<String>,
    #[serde(default)]
    pub liquibase_exec_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accepted {
    pub job_id: JobId,
    pub status_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareJobResult {
    pub dsn: String,
    pub instance_id: InstanceId,
    pub state_id: StateId,
    pub image_id: String,
    pub prepare_kind: PrepareKind,
    pub prepare_args_normalized: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub tasks: Vec<crate::model::Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PrepareJobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameEntry {
    pub name: String,
    pub instance_id: Option<InstanceId>,
    pub image_id: String,
    pub state_id: StateId,
    pub state_fingerprint: String,
    pub last_used_at: DateTime<Utc>,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceEntry {
    pub instance_id: InstanceId,
    pub state_id: StateId,
    pub image_id: String,
    pub created_at: DateTime<Utc>,
    pub status: InstanceStatus,
    pub runtime_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    pub state_id: StateId,
    pub state_fingerprint: String,
    pub parent_state_id: Option<StateId>,
    pub image_id: String,
    pub prepare_kind: PrepareKind,
    pub created_at: DateTime<Utc>,
}

impl From<crate::model::Name> for NameEntry {
    fn from(n: crate::model::Name) -> Self {
        NameEntry {
            name: n.name,
            instance_id: n.instance_id,
            image_id: n.image_id,
            state_id: n.state_id,
            state_fingerprint: n.state_fingerprint,
            last_used_at: n.last_used_at,
            is_primary: n.is_primary,
        }
    }
}

impl From<crate::model::Instance> for InstanceEntry {
    fn from(i: crate::model::Instance) -> Self {
        InstanceEntry {
            instance_id: i.instance_id,
            state_id: i.state_id,
            image_id: i.image_id,
            created_at: i.created_at,
            status: i.status,
            runtime_id: i.runtime_id,
        }
    }
}

impl From<crate::model::State> for StateEntry {
    fn from(s: crate::model::State) -> Self {
        StateEntry {
            state_id: s.state_id,
            state_fingerprint: s.state_fingerprint,
            parent_state_id: s.parent_state_id,
            image_id: s.image_id,
            prepare_kind: s.prepare_kind,
            created_at: s.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    ActiveConnections,
    HasDescendants,
    BlockedByDescendant,
    ActiveTasks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionOutcome {
    WouldDelete,
    Blocked,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionNodeResult {
    pub id: String,
    pub kind: String,
    pub outcome: DeletionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<BlockKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResult {
    pub root: DeletionNodeResult,
    pub nodes: Vec<DeletionNodeResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub prepare_kind: PrepareKind,
    pub instance_ref: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Log { message: String },
    Start,
    Exit { code: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_state_uses_camel_case_keys() {
        let state = EngineState {
            endpoint: "127.0.0.1:1234".into(),
            pid: 42,
            started_at: Utc::now(),
            auth_token: "tok".into(),
            version: "0.1.0".into(),
            instance_id: "abc".into(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("startedAt").is_some());
        assert!(json.get("authToken").is_some());
        assert!(json.get("instanceId").is_some());
    }

    #[test]
    fn prepare_request_defaults_snapshot_mode_to_always() {
        let json = serde_json::json!({
            "prepare_kind": "psql",
            "image_id": "postgres:15",
            "psql_args": ["-c", "select 1"],
        });
        let req: PrepareRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.snapshot_mode, "always");
        assert!(!req.plan_only);
    }
}
