//! The catalog's entity types (§3 DATA MODEL).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{InstanceId, JobId, StateId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrepareKind {
    Psql,
    Liquibase,
}

impl PrepareKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrepareKind::Psql => "psql",
            PrepareKind::Liquibase => "liquibase",
        }
    }
}

impl std::str::FromStr for PrepareKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "psql" => Ok(PrepareKind::Psql),
            "liquibase" => Ok(PrepareKind::Liquibase),
            other => Err(format!("unknown prepare_kind {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub state_id: StateId,
    pub state_fingerprint: String,
    pub parent_state_id: Option<StateId>,
    pub image_id: String,
    pub prepare_kind: PrepareKind,
    pub prepare_args_normalized: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: InstanceId,
    pub state_id: StateId,
    pub image_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: InstanceStatus,
    pub runtime_id: Option<String>,
    pub runtime_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name {
    pub name: String,
    pub instance_id: Option<InstanceId>,
    pub image_id: String,
    pub state_id: StateId,
    pub state_fingerprint: String,
    pub last_used_at: DateTime<Utc>,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareJob {
    pub job_id: JobId,
    pub status: JobStatus,
    pub prepare_kind: PrepareKind,
    pub image_id: String,
    pub plan_only: bool,
    pub snapshot_mode: String,
    pub prepare_args_normalized: String,
    pub signature: String,
    pub request_json: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result_json: Option<serde_json::Value>,
    pub error_json: Option<serde_json::Value>,
}

impl PrepareJob {
    pub fn default_snapshot_mode() -> String {
        "always".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Plan,
    StateExecute,
    InstanceExecute,
    Snapshot,
    InstanceCreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cached,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    State,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceMode {
    None,
    Execute,
    Create,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangesetRef {
    pub changeset_id: Option<String>,
    pub changeset_author: Option<String>,
    pub changeset_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub position: u32,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub planner_kind: PrepareKind,
    pub input_kind: InputKind,
    pub input_id: String,
    pub image_id: String,
    pub resolved_image_id: Option<String>,
    pub task_hash: Option<String>,
    pub output_state_id: Option<StateId>,
    pub cached: Option<bool>,
    pub instance_mode: InstanceMode,
    #[serde(flatten)]
    pub changeset: ChangesetRef,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Status,
    Task,
    Log,
    Result,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub seq: u64,
    pub job_id: JobId,
    pub event_type: EventType,
    pub ts: DateTime<Utc>,
    pub status: Option<JobStatus>,
    pub task_id: Option<TaskId>,
    pub message: Option<String>,
    pub result_json: Option<serde_json::Value>,
    pub error_json: Option<serde_json::Value>,
}

impl JobEvent {
    pub fn log(job_id: JobId, seq: u64, ts: DateTime<Utc>, message: impl Into<String>) -> Self {
        JobEvent {
            seq,
            job_id,
            event_type: EventType::Log,
            ts,
            status: None,
            task_id: None,
            message: Some(message.into()),
            result_json: None,
            error_json: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn prepare_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PrepareKind::Liquibase).unwrap(),
            "\"liquibase\""
        );
    }
}
