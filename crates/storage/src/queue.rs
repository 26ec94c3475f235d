//! Queue Store operations (§4.2): `prepare_jobs`, `prepare_tasks`, and
//! `prepare_events`.

use chrono::Utc;
use sqlrs_core::id::JobId;
use sqlrs_core::model::{JobEvent, JobStatus, PrepareJob, PrepareKind, Task};

use crate::catalog::Catalog;
use crate::error::CatalogError;
use crate::event::{CatalogEvent, JobPatch};
use crate::filters::JobFilter;

impl Catalog {
    #[allow(clippy::too_many_arguments)]
    pub fn create_job(
        &self,
        job_id: JobId,
        prepare_kind: PrepareKind,
        image_id: String,
        plan_only: bool,
        snapshot_mode: String,
        prepare_args_normalized: String,
        signature: String,
        request_json: serde_json::Value,
    ) -> Result<PrepareJob, CatalogError> {
        let job = PrepareJob {
            job_id,
            status: JobStatus::Queued,
            prepare_kind,
            image_id,
            plan_only,
            snapshot_mode,
            prepare_args_normalized,
            signature,
            request_json,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result_json: None,
            error_json: None,
        };
        self.commit(CatalogEvent::JobCreated(job.clone()))?;
        Ok(job)
    }

    /// Partial update: only `Some` fields in `patch` are written (§4.2
    /// `UpdateJob`).
    pub fn update_job(&self, job_id: &JobId, patch: JobPatch) -> Result<(), CatalogError> {
        if patch.is_empty() {
            return Ok(());
        }
        {
            let inner = self.inner.lock();
            if !inner.state.jobs.contains_key(job_id.as_str()) {
                return Err(CatalogError::NotFound(format!("job {job_id} not found")));
            }
        }
        self.commit(CatalogEvent::JobUpdated {
            job_id: job_id.clone(),
            patch,
        })
    }

    pub fn get_job(&self, job_id: &JobId) -> Option<PrepareJob> {
        self.inner.lock().state.get_job(job_id).cloned()
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Vec<PrepareJob> {
        let inner = self.inner.lock();
        let mut rows: Vec<PrepareJob> = inner
            .state
            .jobs
            .values()
            .filter(|j| filter.image_id.as_deref().map_or(true, |img| j.image_id == img))
            .filter(|j| filter.status.map_or(true, |st| j.status == st))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rows
    }

    pub fn list_jobs_by_status(&self, status: JobStatus) -> Vec<PrepareJob> {
        self.list_jobs(&JobFilter {
            image_id: None,
            status: Some(status),
        })
    }

    /// Ordered newest-completed first (§4.2), for dedup lookups against an
    /// in-flight or already-finished job with the same `signature`.
    pub fn list_jobs_by_signature(&self, signature: &str) -> Vec<PrepareJob> {
        let inner = self.inner.lock();
        let mut rows: Vec<PrepareJob> = inner
            .state
            .jobs
            .values()
            .filter(|j| j.signature == signature)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.finished_at.cmp(&a.finished_at).then(b.created_at.cmp(&a.created_at)));
        rows
    }

    pub fn delete_job(&self, job_id: &JobId) -> Result<(), CatalogError> {
        self.commit(CatalogEvent::JobDeleted {
            job_id: job_id.clone(),
        })
    }

    pub fn replace_tasks(&self, job_id: &JobId, tasks: Vec<Task>) -> Result<(), CatalogError> {
        self.commit(CatalogEvent::TasksReplaced {
            job_id: job_id.clone(),
            tasks,
        })
    }

    pub fn get_tasks(&self, job_id: &JobId) -> Vec<Task> {
        self.inner.lock().state.get_tasks(job_id)
    }

    /// Assigns `seq` from the WAL's own write sequence, under the same lock
    /// that appends the event, so a single writer never produces duplicate
    /// or out-of-order sequence numbers (§4.2 "AppendEvent returns the
    /// assigned seq").
    pub fn append_event(
        &self,
        job_id: &JobId,
        event_type: sqlrs_core::model::EventType,
        status: Option<JobStatus>,
        task_id: Option<sqlrs_core::id::TaskId>,
        message: Option<String>,
        result_json: Option<serde_json::Value>,
        error_json: Option<serde_json::Value>,
    ) -> Result<JobEvent, CatalogError> {
        let mut inner = self.inner.lock();
        let seq = inner.wal.write_seq() + 1;
        let event = JobEvent {
            seq,
            job_id: job_id.clone(),
            event_type,
            ts: Utc::now(),
            status,
            task_id,
            message,
            result_json,
            error_json,
        };
        let catalog_event = CatalogEvent::JobEventAppended(event.clone());
        inner.wal.append(&catalog_event)?;
        inner.wal.flush()?;
        inner.state.apply(catalog_event);
        Ok(event)
    }

    /// Offset-based (not seq-based): returns rows in `seq` order starting
    /// at the `offset`-th event (§4.2 `ListEventsSince`).
    pub fn list_events_since(&self, job_id: &JobId, offset: usize) -> Vec<JobEvent> {
        let mut events = self.inner.lock().state.get_events(job_id);
        events.sort_by_key(|e| e.seq);
        events.into_iter().skip(offset).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrs_core::id::{IdGen, UuidIdGen};
    use tempfile::tempdir;

    fn open_catalog() -> (tempfile::TempDir, Catalog) {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        (dir, catalog)
    }

    fn new_job(catalog: &Catalog) -> PrepareJob {
        let gen = UuidIdGen;
        catalog
            .create_job(
                JobId::new(gen.next_id()),
                PrepareKind::Psql,
                "postgres:15".into(),
                false,
                "always".into(),
                "".into(),
                "sig-1".into(),
                serde_json::json!({}),
            )
            .unwrap()
    }

    #[test]
    fn update_job_only_touches_provided_fields() {
        let (_dir, catalog) = open_catalog();
        let job = new_job(&catalog);
        catalog
            .update_job(
                &job.job_id,
                JobPatch {
                    status: Some(JobStatus::Running),
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .unwrap();
        let updated = catalog.get_job(&job.job_id).unwrap();
        assert_eq!(updated.status, JobStatus::Running);
        assert!(updated.started_at.is_some());
        assert!(updated.finished_at.is_none());
    }

    #[test]
    fn append_event_assigns_monotonic_seq() {
        let (_dir, catalog) = open_catalog();
        let job = new_job(&catalog);
        let e1 = catalog
            .append_event(&job.job_id, sqlrs_core::model::EventType::Log, None, None, Some("a".into()), None, None)
            .unwrap();
        let e2 = catalog
            .append_event(&job.job_id, sqlrs_core::model::EventType::Log, None, None, Some("b".into()), None, None)
            .unwrap();
        assert!(e2.seq > e1.seq);
    }

    #[test]
    fn list_events_since_is_offset_based() {
        let (_dir, catalog) = open_catalog();
        let job = new_job(&catalog);
        for i in 0..3 {
            catalog
                .append_event(
                    &job.job_id,
                    sqlrs_core::model::EventType::Log,
                    None,
                    None,
                    Some(format!("msg-{i}")),
                    None,
                    None,
                )
                .unwrap();
        }
        let since_one = catalog.list_events_since(&job.job_id, 1);
        assert_eq!(since_one.len(), 2);
        assert_eq!(since_one[0].message.as_deref(), Some("msg-1"));
    }

    #[test]
    fn delete_job_cascades_tasks_and_events() {
        let (_dir, catalog) = open_catalog();
        let job = new_job(&catalog);
        catalog
            .append_event(&job.job_id, sqlrs_core::model::EventType::Log, None, None, Some("a".into()), None, None)
            .unwrap();
        catalog.delete_job(&job.job_id).unwrap();
        assert!(catalog.get_job(&job.job_id).is_none());
        assert!(catalog.get_tasks(&job.job_id).is_empty());
        assert!(catalog.list_events_since(&job.job_id, 0).is_empty());
    }
}
