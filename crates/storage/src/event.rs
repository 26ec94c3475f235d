//! The WAL's payload type. Every catalog mutation is represented as one
//! `CatalogEvent`, appended to the write-ahead log before it is applied to
//! the in-memory [`crate::MaterializedState`] (§4.2 "Catalog").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlrs_core::id::{InstanceId, JobId, StateId};
use sqlrs_core::model::{Instance, JobEvent, JobStatus, Name, PrepareJob, State, Task};

/// Partial update for a `prepare_jobs` row (§4.2 `UpdateJob`: "partial
/// update: non-null fields only"). Each `Some` field is applied; `None`
/// fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result_json: Option<serde_json::Value>,
    pub error_json: Option<serde_json::Value>,
}

impl JobPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.started_at.is_none()
            && self.finished_at.is_none()
            && self.result_json.is_none()
            && self.error_json.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CatalogEvent {
    StateCreated(State),
    StateDeleted {
        state_id: StateId,
    },
    InstanceCreated(Instance),
    InstanceRuntimeUpdated {
        instance_id: InstanceId,
        runtime_id: String,
    },
    InstanceRuntimeDirSet {
        instance_id: InstanceId,
        runtime_dir: String,
    },
    InstanceDeleted {
        instance_id: InstanceId,
    },
    NameSet(Name),
    NameRemoved {
        name: String,
    },
    JobCreated(PrepareJob),
    JobUpdated {
        job_id: JobId,
        patch: JobPatch,
    },
    TasksReplaced {
        job_id: JobId,
        tasks: Vec<Task>,
    },
    JobDeleted {
        job_id: JobId,
    },
    JobEventAppended(JobEvent),
}
