//! Materialized catalog state built from WAL replay (§3 DATA MODEL).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlrs_core::id::{InstanceId, JobId, StateId};
use sqlrs_core::model::{Instance, JobEvent, Name, PrepareJob, State, Task};

use crate::event::CatalogEvent;

/// Bump when [`MaterializedState`]'s shape changes in a way [`crate::migration`]
/// needs to know about.
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    #[serde(default)]
    pub v: u32,
    pub states: HashMap<String, State>,
    pub instances: HashMap<String, Instance>,
    pub names: HashMap<String, Name>,
    pub jobs: HashMap<String, PrepareJob>,
    pub tasks: HashMap<String, Vec<Task>>,
    #[serde(default)]
    pub events: HashMap<String, Vec<JobEvent>>,
}

impl MaterializedState {
    pub fn new() -> Self {
        MaterializedState {
            v: CURRENT_SNAPSHOT_VERSION,
            ..Default::default()
        }
    }

    pub fn apply(&mut self, event: CatalogEvent) {
        match event {
            CatalogEvent::StateCreated(state) => {
                self.states.insert(state.state_id.as_str().to_string(), state);
            }
            CatalogEvent::StateDeleted { state_id } => {
                self.states.remove(state_id.as_str());
            }
            CatalogEvent::InstanceCreated(instance) => {
                self.instances
                    .insert(instance.instance_id.as_str().to_string(), instance);
            }
            CatalogEvent::InstanceRuntimeUpdated {
                instance_id,
                runtime_id,
            } => {
                if let Some(instance) = self.instances.get_mut(instance_id.as_str()) {
                    instance.runtime_id = Some(runtime_id);
                }
            }
            CatalogEvent::InstanceRuntimeDirSet {
                instance_id,
                runtime_dir,
            } => {
                if let Some(instance) = self.instances.get_mut(instance_id.as_str()) {
                    instance.runtime_dir = Some(runtime_dir);
                }
            }
            CatalogEvent::InstanceDeleted { instance_id } => {
                self.instances.remove(instance_id.as_str());
                for name in self.names.values_mut() {
                    if name.instance_id.as_ref() == Some(&instance_id) {
                        name.instance_id = None;
                    }
                }
            }
            CatalogEvent::NameSet(name) => {
                self.names.insert(name.name.clone(), name);
            }
            CatalogEvent::NameRemoved { name } => {
                self.names.remove(&name);
            }
            CatalogEvent::JobCreated(job) => {
                self.jobs.insert(job.job_id.as_str().to_string(), job);
            }
            CatalogEvent::JobUpdated { job_id, patch } => {
                if let Some(job) = self.jobs.get_mut(job_id.as_str()) {
                    apply_job_patch(job, patch);
                }
            }
            CatalogEvent::TasksReplaced { job_id, tasks } => {
                self.tasks.insert(job_id.as_str().to_string(), tasks);
            }
            CatalogEvent::JobDeleted { job_id } => {
                self.jobs.remove(job_id.as_str());
                self.tasks.remove(job_id.as_str());
                self.events.remove(job_id.as_str());
            }
            CatalogEvent::JobEventAppended(event) => {
                self.events
                    .entry(event.job_id.as_str().to_string())
                    .or_default()
                    .push(event);
            }
        }
    }

    pub fn get_state(&self, state_id: &StateId) -> Option<&State> {
        self.states.get(state_id.as_str())
    }

    pub fn find_state_by_fingerprint(&self, image_id: &str, fingerprint: &str) -> Option<&State> {
        self.states
            .values()
            .find(|s| s.image_id == image_id && s.state_fingerprint == fingerprint)
    }

    pub fn get_instance(&self, instance_id: &InstanceId) -> Option<&Instance> {
        self.instances.get(instance_id.as_str())
    }

    pub fn get_job(&self, job_id: &JobId) -> Option<&PrepareJob> {
        self.jobs.get(job_id.as_str())
    }

    pub fn get_tasks(&self, job_id: &JobId) -> Vec<Task> {
        self.tasks.get(job_id.as_str()).cloned().unwrap_or_default()
    }

    pub fn get_events(&self, job_id: &JobId) -> Vec<JobEvent> {
        self.events.get(job_id.as_str()).cloned().unwrap_or_default()
    }

    pub fn descendant_state_ids(&self, parent: &StateId) -> Vec<StateId> {
        self.states
            .values()
            .filter(|s| s.parent_state_id.as_ref() == Some(parent))
            .map(|s| s.state_id.clone())
            .collect()
    }

    pub fn instances_of_state(&self, state_id: &StateId) -> Vec<InstanceId> {
        self.instances
            .values()
            .filter(|i| &i.state_id == state_id)
            .map(|i| i.instance_id.clone())
            .collect()
    }

    /// Jobs whose task list wrote `state_id` as an `output_state_id` at any
    /// position, used by the Deletion Planner to find jobs blocking a
    /// state (§4.5).
    pub fn jobs_producing_state(&self, state_id: &StateId) -> Vec<JobId> {
        self.tasks
            .iter()
            .filter(|(_, tasks)| {
                tasks
                    .iter()
                    .any(|t| t.output_state_id.as_ref() == Some(state_id))
            })
            .filter_map(|(job_id, _)| self.jobs.get(job_id).map(|j| j.job_id.clone()))
            .collect()
    }
}

fn apply_job_patch(job: &mut PrepareJob, patch: crate::event::JobPatch) {
    if let Some(status) = patch.status {
        job.status = status;
    }
    if let Some(started_at) = patch.started_at {
        job.started_at = Some(started_at);
    }
    if let Some(finished_at) = patch.finished_at {
        job.finished_at = Some(finished_at);
    }
    if let Some(result_json) = patch.result_json {
        job.result_json = Some(result_json);
    }
    if let Some(error_json) = patch.error_json {
        job.error_json = Some(error_json);
    }
}
