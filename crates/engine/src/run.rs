//! `Run` (§4.4 "container-missing recovery", §6.2 `POST /v1/runs`): execs
//! `psql`/`liquibase` against an already-provisioned instance, recreating
//! its container from the StateFS clone on disk if the runtime lost track
//! of it.

use std::sync::Arc;

use sqlrs_adapters::{ExecRequest, Runtime, StartRequest};
use sqlrs_core::id::InstanceId;
use sqlrs_core::model::PrepareKind;
use sqlrs_core::proto::{RunEvent, RunRequest};
use sqlrs_storage::Catalog;
use tracing::info;

use crate::error::EngineError;

pub struct Runner {
    catalog: Arc<Catalog>,
    runtime: Arc<dyn Runtime>,
}

impl Runner {
    pub fn new(catalog: Arc<Catalog>, runtime: Arc<dyn Runtime>) -> Self {
        Runner { catalog, runtime }
    }

    pub async fn run(&self, request: &RunRequest) -> Result<Vec<RunEvent>, EngineError> {
        let (instance, found, _) = self.catalog.get_instance(&request.instance_ref);
        if !found {
            return Err(EngineError::NotFound(format!("instance {}", request.instance_ref)));
        }
        let mut instance = instance.ok_or_else(|| EngineError::NotFound(format!("instance {}", request.instance_ref)))?;
        let runtime_id = instance
            .runtime_id
            .clone()
            .ok_or_else(|| EngineError::Conflict(format!("instance {} has no attached runtime", instance.instance_id)))?;

        let mut events = vec![RunEvent::Start];
        let exec_req = exec_request(request.prepare_kind, &request.args);

        match self.runtime.exec(&runtime_id, &exec_req).await {
            Ok(stdout) => {
                events.push(RunEvent::Log { message: stdout });
                events.push(RunEvent::Exit { code: 0 });
                Ok(events)
            }
            Err(e) if sqlrs_adapters::RuntimeError::looks_like_missing_container(&e.to_string()) => {
                self.recover_and_retry(&mut instance, &exec_req, &mut events).await?;
                Ok(events)
            }
            Err(e) => Err(EngineError::RuntimeFailure(e.to_string())),
        }
    }

    async fn recover_and_retry(
        &self,
        instance: &mut sqlrs_core::model::Instance,
        exec_req: &ExecRequest,
        events: &mut Vec<RunEvent>,
    ) -> Result<(), EngineError> {
        events.push(RunEvent::Log {
            message: "run: container missing - recreating".to_string(),
        });

        let runtime_dir = instance
            .runtime_dir
            .clone()
            .ok_or_else(|| EngineError::RuntimeFailure(format!("instance {} has no runtime_dir to recover from", instance.instance_id)))?;
        let merged = format!("{runtime_dir}/merged");
        let data_dir = if tokio::fs::try_exists(&merged).await.unwrap_or(false) {
            merged
        } else {
            runtime_dir
        };

        events.push(RunEvent::Log {
            message: "run: restoring runtime".to_string(),
        });

        let start_req = StartRequest {
            image: instance.image_id.clone(),
            data_dir,
            name: format!("sqlrs-run-{}", instance.instance_id),
        };
        let new_instance = self
            .runtime
            .start(&start_req)
            .await
            .map_err(|e| EngineError::RuntimeFailure(e.to_string()))?;

        self.catalog
            .update_instance_runtime(&InstanceId::new(instance.instance_id.as_str()), new_instance.runtime_id.clone())?;
        instance.runtime_id = Some(new_instance.runtime_id.clone());

        events.push(RunEvent::Log {
            message: "run: container started".to_string(),
        });
        info!(instance_id = %instance.instance_id, runtime_id = %new_instance.runtime_id, "recreated container for run");

        let stdout = self
            .runtime
            .exec(&new_instance.runtime_id, exec_req)
            .await
            .map_err(|e| EngineError::RuntimeFailure(e.to_string()))?;
        events.push(RunEvent::Log { message: stdout });
        events.push(RunEvent::Exit { code: 0 });
        Ok(())
    }
}

fn exec_request(kind: PrepareKind, args: &[String]) -> ExecRequest {
    let binary = match kind {
        PrepareKind::Psql => "psql",
        PrepareKind::Liquibase => "liquibase",
    };
    let mut full_args = vec![binary.to_string()];
    full_args.extend(args.iter().cloned());
    ExecRequest {
        user: Some("postgres".to_string()),
        args: full_args,
        stdin: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrs_adapters::FakeRuntime;
    use sqlrs_core::id::{IdGen, StateId, UuidIdGen};
    use sqlrs_core::model::PrepareKind;
    use tempfile::tempdir;

    fn open_catalog() -> (tempfile::TempDir, Arc<Catalog>) {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(dir.path()).unwrap());
        (dir, catalog)
    }

    async fn seeded_instance(catalog: &Catalog, runtime_id: Option<&str>, runtime_dir: Option<&str>) -> InstanceId {
        let gen = UuidIdGen;
        let state_id = StateId::new(gen.next_id());
        catalog
            .create_state(state_id.clone(), "fp".into(), None, "postgres:15".into(), PrepareKind::Psql, "".into(), None)
            .unwrap();
        let instance_id = InstanceId::new(gen.next_id());
        catalog
            .create_instance(instance_id.clone(), state_id, "postgres:15".into(), None)
            .unwrap();
        if let Some(rid) = runtime_id {
            catalog.update_instance_runtime(&instance_id, rid.to_string()).unwrap();
        }
        if let Some(dir) = runtime_dir {
            catalog.set_instance_runtime_dir(&instance_id, dir.to_string()).unwrap();
        }
        instance_id
    }

    #[tokio::test]
    async fn run_against_live_container_execs_once() {
        let (_dir, catalog) = open_catalog();
        let instance_id = seeded_instance(&catalog, Some("rt-1"), Some("/tmp/rt-1")).await;
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_next_exec_output("ok\n");
        let runner = Runner::new(catalog, runtime.clone());

        let events = runner
            .run(&RunRequest {
                prepare_kind: PrepareKind::Psql,
                instance_ref: instance_id.as_str().to_string(),
                args: vec!["-c".into(), "select 1".into()],
            })
            .await
            .unwrap();

        assert!(matches!(events[0], RunEvent::Start));
        assert!(matches!(events.last().unwrap(), RunEvent::Exit { code: 0 }));
        assert_eq!(runtime.exec_calls().len(), 1);
    }

    #[tokio::test]
    async fn missing_container_recovers_and_retries() {
        let (_dir, catalog) = open_catalog();
        let instance_id = seeded_instance(&catalog, Some("rt-stale"), Some("/tmp/rt-stale")).await;
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_next_exec_as_missing("rt-stale");
        runtime.set_next_exec_output("ok\n");
        let runner = Runner::new(catalog, runtime.clone());

        let events = runner
            .run(&RunRequest {
                prepare_kind: PrepareKind::Psql,
                instance_ref: instance_id.as_str().to_string(),
                args: vec!["-c".into(), "select 1".into()],
            })
            .await
            .unwrap();

        let messages: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Log { message } => Some(message.clone()),
                _ => None,
            })
            .collect();
        assert!(messages.contains(&"run: container missing - recreating".to_string()));
        assert!(messages.contains(&"run: restoring runtime".to_string()));
        assert!(messages.contains(&"run: container started".to_string()));
        assert!(matches!(events.last().unwrap(), RunEvent::Exit { code: 0 }));
    }

    #[tokio::test]
    async fn unknown_instance_ref_is_not_found() {
        let (_dir, catalog) = open_catalog();
        let runtime = Arc::new(FakeRuntime::new());
        let runner = Runner::new(catalog, runtime);
        let result = runner
            .run(&RunRequest {
                prepare_kind: PrepareKind::Psql,
                instance_ref: "no-such-instance".into(),
                args: vec![],
            })
            .await;
        assert!(result.is_err());
    }
}
