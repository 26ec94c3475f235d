//! Deletion Planner (§4.5): builds a transient graph rooted at an instance
//! or state, classifies blocks per node, and — outside dry-run — executes
//! the deletion in post-order within one catalog transaction's worth of
//! mutating calls (the embedded catalog itself serializes writers, so
//! "one transaction" here means "one call to this planner holds the
//! catalog lock's serialization, not that any single call is atomic
//! across a crash").

use std::sync::Arc;

use sqlrs_adapters::ConnTracker;
use sqlrs_core::id::{InstanceId, StateId};
use sqlrs_core::image::CanonicalImage;
use sqlrs_core::model::JobStatus;
use sqlrs_core::proto::{BlockKind, DeleteResult, DeletionNodeResult, DeletionOutcome};
use sqlrs_statefs::{layout, StateFs};
use sqlrs_storage::Catalog;
use tracing::warn;

use crate::error::EngineError;

pub struct DeletionPlanner {
    catalog: Arc<Catalog>,
    statefs: Arc<dyn StateFs>,
    conn_tracker: Arc<dyn ConnTracker>,
    store_root: std::path::PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct DeleteOptions {
    pub force: bool,
    pub recurse: bool,
    pub dry_run: bool,
}

enum Node {
    Instance(InstanceId),
    State(StateId),
    Job(sqlrs_core::id::JobId),
}

impl DeletionPlanner {
    pub fn new(
        catalog: Arc<Catalog>,
        statefs: Arc<dyn StateFs>,
        conn_tracker: Arc<dyn ConnTracker>,
        store_root: std::path::PathBuf,
    ) -> Self {
        DeletionPlanner {
            catalog,
            statefs,
            conn_tracker,
            store_root,
        }
    }

    pub async fn delete_instance(
        &self,
        instance_id: &InstanceId,
        opts: DeleteOptions,
    ) -> Result<DeleteResult, EngineError> {
        let (instance, found, _) = self.catalog.get_instance(instance_id.as_str());
        let instance = instance.ok_or_else(|| EngineError::NotFound(format!("instance {instance_id}")))?;
        if !found {
            return Err(EngineError::NotFound(format!("instance {instance_id}")));
        }

        let block = self.classify_instance(&instance).await;
        let deletable = is_deletable(block, opts.force);
        let outcome = outcome_for(deletable, opts.dry_run);

        let root = DeletionNodeResult {
            id: instance.instance_id.as_str().to_string(),
            kind: "instance".to_string(),
            outcome,
            blocked: if deletable { None } else { block },
        };

        if outcome != DeletionOutcome::Deleted {
            return Ok(DeleteResult { root, nodes: vec![] });
        }

        self.execute(Node::Instance(instance.instance_id.clone())).await?;
        Ok(DeleteResult { root, nodes: vec![] })
    }

    pub async fn delete_state(
        &self,
        state_id: &StateId,
        opts: DeleteOptions,
    ) -> Result<DeleteResult, EngineError> {
        let (state, found) = self.catalog.get_state(state_id);
        let state = state.ok_or_else(|| EngineError::NotFound(format!("state {state_id}")))?;
        if !found {
            return Err(EngineError::NotFound(format!("state {state_id}")));
        }

        let mut nodes = Vec::new();
        let (root_block, blocked_by_descendant) =
            Box::pin(self.classify_state_subtree(state_id, opts, &mut nodes)).await?;

        let root_block = if blocked_by_descendant && root_block.is_none() {
            Some(BlockKind::BlockedByDescendant)
        } else {
            root_block
        };
        let deletable = is_deletable(root_block, opts.force) && !blocked_by_descendant_unresolved(&nodes);
        let outcome = outcome_for(deletable, opts.dry_run);

        let root = DeletionNodeResult {
            id: state.state_id.as_str().to_string(),
            kind: "state".to_string(),
            outcome,
            blocked: if deletable { None } else { root_block },
        };

        if outcome != DeletionOutcome::Deleted {
            return Ok(DeleteResult { root, nodes });
        }

        self.execute_subtree(state_id, &nodes).await?;
        Ok(DeleteResult { root, nodes })
    }

    async fn classify_instance(&self, instance: &sqlrs_core::model::Instance) -> Option<BlockKind> {
        if let Some(runtime_id) = &instance.runtime_id {
            if let Ok(count) = self.conn_tracker.active_connections(runtime_id).await {
                if count > 0 {
                    return Some(BlockKind::ActiveConnections);
                }
            }
        }
        None
    }

    /// Walks descendants depth-first, collecting a `DeletionNodeResult`
    /// per node and returning `(this_state's_block, any_descendant_blocked)`.
    async fn classify_state_subtree(
        &self,
        state_id: &StateId,
        opts: DeleteOptions,
        nodes: &mut Vec<DeletionNodeResult>,
    ) -> Result<(Option<BlockKind>, bool), EngineError> {
        let children_states = self.catalog.descendant_state_ids(state_id);
        let children_instances = self.catalog.instances_of_state(state_id);
        let producing_jobs = self.catalog.jobs_producing_state(state_id);

        let has_descendants = !children_states.is_empty() || !children_instances.is_empty();
        let mut any_descendant_blocked = false;

        for instance_id in &children_instances {
            let (instance, _, _) = self.catalog.get_instance(instance_id.as_str());
            let Some(instance) = instance else { continue };
            let block = self.classify_instance(&instance).await;
            let deletable = is_deletable(block, opts.force);
            if !deletable {
                any_descendant_blocked = true;
            }
            nodes.push(DeletionNodeResult {
                id: instance_id.as_str().to_string(),
                kind: "instance".to_string(),
                outcome: outcome_for(deletable, opts.dry_run),
                blocked: if deletable { None } else { block },
            });
        }

        for job_id in &producing_jobs {
            if let Some(job) = self.catalog.get_job(job_id) {
                if !job.status.is_terminal() {
                    any_descendant_blocked = true;
                    nodes.push(DeletionNodeResult {
                        id: job_id.as_str().to_string(),
                        kind: "job".to_string(),
                        outcome: outcome_for(opts.force, opts.dry_run),
                        blocked: if opts.force { None } else { Some(BlockKind::ActiveTasks) },
                    });
                }
            }
        }

        for child_state_id in &children_states {
            let (child_block, child_descendant_blocked) =
                Box::pin(self.classify_state_subtree(child_state_id, opts, nodes)).await?;
            if child_descendant_blocked {
                any_descendant_blocked = true;
            }
            let deletable = is_deletable(child_block, opts.force) && !child_descendant_blocked;
            if !deletable {
                any_descendant_blocked = true;
            }
            nodes.push(DeletionNodeResult {
                id: child_state_id.as_str().to_string(),
                kind: "state".to_string(),
                outcome: outcome_for(deletable, opts.dry_run),
                blocked: if deletable {
                    None
                } else if child_descendant_blocked {
                    Some(BlockKind::BlockedByDescendant)
                } else {
                    child_block
                },
            });
        }

        let this_block = if has_descendants && !opts.recurse {
            Some(BlockKind::HasDescendants)
        } else {
            None
        };

        Ok((this_block, any_descendant_blocked))
    }

    async fn execute(&self, node: Node) -> Result<(), EngineError> {
        match node {
            Node::Instance(instance_id) => self.delete_instance_node(&instance_id).await,
            Node::State(state_id) => self.delete_state_node(&state_id).await,
            Node::Job(job_id) => self.cancel_and_delete_job(&job_id).await,
        }
    }

    async fn execute_subtree(
        &self,
        root_state: &StateId,
        nodes: &[DeletionNodeResult],
    ) -> Result<(), EngineError> {
        for node in nodes {
            if node.outcome != DeletionOutcome::Deleted {
                continue;
            }
            match node.kind.as_str() {
                "instance" => self.delete_instance_node(&InstanceId::new(node.id.clone())).await?,
                "job" => self.cancel_and_delete_job(&sqlrs_core::id::JobId::new(node.id.clone())).await?,
                "state" => self.delete_state_node(&StateId::new(node.id.clone())).await?,
                _ => {}
            }
        }
        self.delete_state_node(root_state).await
    }

    async fn delete_instance_node(&self, instance_id: &InstanceId) -> Result<(), EngineError> {
        let (instance, _, _) = self.catalog.get_instance(instance_id.as_str());
        if let Some(instance) = instance {
            if let Some(runtime_dir) = &instance.runtime_dir {
                if let Err(e) = self.statefs.remove_path(std::path::Path::new(runtime_dir)).await {
                    warn!(instance_id = %instance_id, error = %e, "best-effort runtime dir removal failed");
                }
            }
        }
        self.catalog.delete_instance(instance_id)?;
        Ok(())
    }

    async fn delete_state_node(&self, state_id: &StateId) -> Result<(), EngineError> {
        let (state, found) = self.catalog.get_state(state_id);
        self.catalog.delete_state(state_id)?;
        if let Some(state) = state {
            if found {
                let image = CanonicalImage::parse(&state.image_id);
                let dir = layout::state_dir(&self.store_root, &image, state_id);
                if let Err(e) = self.statefs.remove_path(&dir).await {
                    warn!(state_id = %state_id, error = %e, "best-effort state dir removal failed");
                }
            }
        }
        Ok(())
    }

    async fn cancel_and_delete_job(&self, job_id: &sqlrs_core::id::JobId) -> Result<(), EngineError> {
        if let Some(job) = self.catalog.get_job(job_id) {
            if !job.status.is_terminal() {
                self.catalog.update_job(
                    job_id,
                    sqlrs_storage::JobPatch {
                        status: Some(JobStatus::Cancelled),
                        finished_at: Some(chrono::Utc::now()),
                        ..Default::default()
                    },
                )?;
            }
        }
        self.catalog.delete_job(job_id)?;
        Ok(())
    }
}

fn is_deletable(block: Option<BlockKind>, force: bool) -> bool {
    match block {
        None => true,
        Some(BlockKind::HasDescendants) => false,
        Some(BlockKind::BlockedByDescendant) => false,
        Some(BlockKind::ActiveConnections) | Some(BlockKind::ActiveTasks) => force,
    }
}

fn blocked_by_descendant_unresolved(nodes: &[DeletionNodeResult]) -> bool {
    nodes.iter().any(|n| n.outcome != DeletionOutcome::Deleted && n.outcome != DeletionOutcome::WouldDelete)
}

fn outcome_for(deletable: bool, dry_run: bool) -> DeletionOutcome {
    match (deletable, dry_run) {
        (true, true) => DeletionOutcome::WouldDelete,
        (true, false) => DeletionOutcome::Deleted,
        (false, _) => DeletionOutcome::Blocked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrs_adapters::FakeConnTracker;
    use sqlrs_core::id::{IdGen, UuidIdGen};
    use sqlrs_core::model::PrepareKind;
    use sqlrs_statefs::fake::FakeStateFs;
    use tempfile::tempdir;

    struct Harness {
        _dir: tempfile::TempDir,
        catalog: Arc<Catalog>,
        statefs: Arc<FakeStateFs>,
        conn_tracker: Arc<FakeConnTracker>,
        planner: DeletionPlanner,
    }

    fn harness() -> Harness {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(dir.path()).unwrap());
        let statefs = Arc::new(FakeStateFs::default());
        let conn_tracker = Arc::new(FakeConnTracker::new());
        let planner = DeletionPlanner::new(
            catalog.clone(),
            statefs.clone(),
            conn_tracker.clone(),
            dir.path().to_path_buf(),
        );
        Harness {
            _dir: dir,
            catalog,
            statefs,
            conn_tracker,
            planner,
        }
    }

    fn new_state_id() -> StateId {
        StateId::new(UuidIdGen.next_id())
    }

    fn new_instance_id() -> InstanceId {
        InstanceId::new(UuidIdGen.next_id())
    }

    fn seed_state(catalog: &Catalog, parent: Option<StateId>, fingerprint: &str) -> StateId {
        let id = new_state_id();
        catalog
            .create_state(id.clone(), fingerprint.to_string(), parent, "postgres:15".into(), PrepareKind::Psql, "".into(), None)
            .unwrap();
        id
    }

    fn seed_instance(catalog: &Catalog, state_id: &StateId, runtime_id: Option<&str>) -> InstanceId {
        let id = new_instance_id();
        catalog
            .create_instance(id.clone(), state_id.clone(), "postgres:15".into(), None)
            .unwrap();
        if let Some(rid) = runtime_id {
            catalog.update_instance_runtime(&id, rid.to_string()).unwrap();
        }
        id
    }

    fn opts(force: bool, recurse: bool, dry_run: bool) -> DeleteOptions {
        DeleteOptions { force, recurse, dry_run }
    }

    #[tokio::test]
    async fn deleting_a_leaf_state_with_no_descendants_succeeds() {
        let h = harness();
        let state_id = seed_state(&h.catalog, None, "fp-leaf");
        let result = h.planner.delete_state(&state_id, opts(false, false, false)).await.unwrap();
        assert_eq!(result.root.outcome, DeletionOutcome::Deleted);
        assert!(h.catalog.get_state(&state_id).0.is_none());
    }

    /// §8 scenario 3, first half: a parent with a child state is blocked
    /// without `recurse`.
    #[tokio::test]
    async fn state_with_descendants_is_blocked_without_recurse() {
        let h = harness();
        let root = seed_state(&h.catalog, None, "fp-root");
        let _child = seed_state(&h.catalog, Some(root.clone()), "fp-child");

        let result = h.planner.delete_state(&root, opts(false, false, false)).await.unwrap();
        assert_eq!(result.root.outcome, DeletionOutcome::Blocked);
        assert_eq!(result.root.blocked, Some(BlockKind::HasDescendants));
        assert!(h.catalog.get_state(&root).0.is_some(), "blocked delete must not mutate the catalog");
    }

    /// §8 scenario 3: with `recurse` but an active-connection child
    /// instance and no `force`, the subtree is blocked by that descendant;
    /// adding `force` deletes everything.
    #[tokio::test]
    async fn recurse_blocked_by_active_connections_then_forced_through() {
        let h = harness();
        let root = seed_state(&h.catalog, None, "fp-root");
        let child = seed_state(&h.catalog, Some(root.clone()), "fp-child");
        let inst = seed_instance(&h.catalog, &child, Some("rt-child"));
        h.conn_tracker.set("rt-child", 2);

        let blocked = h.planner.delete_state(&root, opts(false, true, false)).await.unwrap();
        assert_eq!(blocked.root.outcome, DeletionOutcome::Blocked);
        assert_eq!(blocked.root.blocked, Some(BlockKind::BlockedByDescendant));
        assert!(h.catalog.get_instance(inst.as_str()).0.is_some());
        assert!(h.catalog.get_state(&child).0.is_some());

        let forced = h.planner.delete_state(&root, opts(true, true, false)).await.unwrap();
        assert_eq!(forced.root.outcome, DeletionOutcome::Deleted);
        assert!(h.catalog.get_instance(inst.as_str()).0.is_none());
        assert!(h.catalog.get_state(&child).0.is_none());
        assert!(h.catalog.get_state(&root).0.is_none());
    }

    #[tokio::test]
    async fn dry_run_reports_without_mutating() {
        let h = harness();
        let state_id = seed_state(&h.catalog, None, "fp-dry");
        let result = h.planner.delete_state(&state_id, opts(false, false, true)).await.unwrap();
        assert_eq!(result.root.outcome, DeletionOutcome::WouldDelete);
        assert!(h.catalog.get_state(&state_id).0.is_some());
    }

    #[tokio::test]
    async fn instance_with_active_connections_is_blocked_unless_forced() {
        let h = harness();
        let state_id = seed_state(&h.catalog, None, "fp-inst");
        let inst = seed_instance(&h.catalog, &state_id, Some("rt-1"));
        h.conn_tracker.set("rt-1", 1);

        let blocked = h.planner.delete_instance(&inst, opts(false, false, false)).await.unwrap();
        assert_eq!(blocked.root.outcome, DeletionOutcome::Blocked);
        assert_eq!(blocked.root.blocked, Some(BlockKind::ActiveConnections));

        let forced = h.planner.delete_instance(&inst, opts(true, false, false)).await.unwrap();
        assert_eq!(forced.root.outcome, DeletionOutcome::Deleted);
        assert!(h.catalog.get_instance(inst.as_str()).0.is_none());
    }

    #[tokio::test]
    async fn deleting_unknown_instance_is_not_found() {
        let h = harness();
        let result = h.planner.delete_instance(&new_instance_id(), opts(false, false, false)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn deleting_instance_removes_runtime_dir_best_effort() {
        let h = harness();
        let state_id = seed_state(&h.catalog, None, "fp-rtdir");
        let inst = seed_instance(&h.catalog, &state_id, Some("rt-1"));
        h.catalog.set_instance_runtime_dir(&inst, "/tmp/does-not-exist-sqlrs-test".into()).unwrap();

        h.planner.delete_instance(&inst, opts(false, false, false)).await.unwrap();
        assert!(h.statefs.removed.lock().unwrap().iter().any(|p| p.to_string_lossy().contains("does-not-exist")));
    }
}
