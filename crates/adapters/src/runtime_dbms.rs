//! Production [`PsqlRunner`]/[`LiquibaseRunner`]: drive `psql`/`liquibase`
//! inside the running container via [`Runtime::exec`] (§4.1, §4.4), rather
//! than opening a direct TCP connection — the prepare loop always has a
//! live container to exec into, and this keeps client binaries out of the
//! daemon process entirely.

use async_trait::async_trait;
use std::sync::Arc;

use crate::dbms::{DbmsError, LiquibaseRunner, LiquibaseStepRequest, PsqlRunner, PsqlStepRequest, StepOutcome};
use crate::runtime::{ExecRequest, Runtime};

/// Runs psql steps with `-v ON_ERROR_STOP=1` so a failing statement inside
/// a script aborts the whole step instead of psql marching on and exiting
/// zero anyway.
pub struct RuntimePsqlRunner {
    runtime: Arc<dyn Runtime>,
}

impl RuntimePsqlRunner {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        RuntimePsqlRunner { runtime }
    }
}

#[async_trait]
impl PsqlRunner for RuntimePsqlRunner {
    async fn run(&self, req: &PsqlStepRequest) -> Result<StepOutcome, DbmsError> {
        let mut args = vec![
            "psql".to_string(),
            "-v".to_string(),
            "ON_ERROR_STOP=1".to_string(),
            "-d".to_string(),
            req.dsn.clone(),
        ];
        args.extend(req.session_args.iter().cloned());

        let stdin = match (&req.file, &req.sql) {
            (Some(_), Some(_)) => {
                return Err(DbmsError::PsqlFailed("step has both file and sql origins".into()));
            }
            (Some(path), None) => {
                args.push("-f".to_string());
                args.push(path.clone());
                None
            }
            (None, Some(sql)) => {
                // Piped on stdin (`-f -`) rather than `-c` so multi-statement
                // inline scripts behave identically to file-sourced ones.
                args.push("-f".to_string());
                args.push("-".to_string());
                Some(sql.clone())
            }
            (None, None) => {
                return Err(DbmsError::PsqlFailed("step has neither file nor sql origin".into()));
            }
        };

        let exec_req = ExecRequest {
            user: Some("postgres".to_string()),
            args,
            stdin,
        };
        let stdout = self
            .runtime
            .exec(&req.runtime_id, &exec_req)
            .await
            .map_err(|e| DbmsError::PsqlFailed(e.to_string()))?;
        Ok(StepOutcome { stdout })
    }
}

/// Runs a single Liquibase changeset with `--changeset-filter` narrowed to
/// one id+author+path so the planner's per-changeset granularity (§4.1) is
/// preserved even though Liquibase natively operates on whole changelogs.
pub struct RuntimeLiquibaseRunner {
    runtime: Arc<dyn Runtime>,
}

impl RuntimeLiquibaseRunner {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        RuntimeLiquibaseRunner { runtime }
    }
}

#[async_trait]
impl LiquibaseRunner for RuntimeLiquibaseRunner {
    async fn run(&self, req: &LiquibaseStepRequest) -> Result<StepOutcome, DbmsError> {
        let filter = format!(
            "changeSet.id={} AND changeSet.author={} AND changeSet.path={}",
            req.changeset_id, req.changeset_author, req.changeset_path
        );
        let exec_req = ExecRequest {
            user: Some("postgres".to_string()),
            args: vec![
                "liquibase".to_string(),
                format!("--changelog-file={}", req.changelog),
                format!("--url={}", req.dsn),
                "--changeset-filter-result=PASS".to_string(),
                format!("--changeset-filter={filter}"),
                "update".to_string(),
            ],
            stdin: None,
        };
        let stdout = self
            .runtime
            .exec(&req.runtime_id, &exec_req)
            .await
            .map_err(|e| DbmsError::LiquibaseFailed(e.to_string()))?;
        Ok(StepOutcome { stdout })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_runtime::FakeRuntime;

    #[tokio::test]
    async fn psql_file_step_passes_dash_f() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_next_exec_output("CREATE TABLE\n");
        let runner = RuntimePsqlRunner::new(runtime.clone());
        let req = PsqlStepRequest {
            runtime_id: "rt-1".into(),
            dsn: "postgresql://postgres@127.0.0.1:5432/app".into(),
            file: Some("/scripts/001_init.sql".into()),
            sql: None,
            session_args: vec![],
        };
        let out = runner.run(&req).await.unwrap();
        assert_eq!(out.stdout, "CREATE TABLE\n");
        let calls = runtime.exec_calls();
        assert!(calls[0].args.contains(&"-f".to_string()));
        assert!(calls[0].args.contains(&"/scripts/001_init.sql".to_string()));
    }

    #[tokio::test]
    async fn psql_rejects_both_file_and_sql() {
        let runtime = Arc::new(FakeRuntime::new());
        let runner = RuntimePsqlRunner::new(runtime);
        let req = PsqlStepRequest {
            runtime_id: "rt-1".into(),
            dsn: "postgresql://postgres@127.0.0.1:5432/app".into(),
            file: Some("/x.sql".into()),
            sql: Some("select 1".into()),
            session_args: vec![],
        };
        assert!(runner.run(&req).await.is_err());
    }

    #[tokio::test]
    async fn liquibase_filters_single_changeset() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_next_exec_output("Liquibase: Update has been successful.\n");
        let runner = RuntimeLiquibaseRunner::new(runtime.clone());
        let req = LiquibaseStepRequest {
            runtime_id: "rt-1".into(),
            dsn: "postgresql://postgres@127.0.0.1:5432/app".into(),
            changelog: "db/changelog.xml".into(),
            changeset_id: "create-users".into(),
            changeset_author: "alice".into(),
            changeset_path: "db/changes/001.xml".into(),
        };
        let out = runner.run(&req).await.unwrap();
        assert!(out.stdout.contains("successful"));
        let calls = runtime.exec_calls();
        assert!(calls[0].args.iter().any(|a| a.contains("create-users")));
    }
}
