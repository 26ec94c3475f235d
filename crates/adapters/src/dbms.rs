//! DBMS plug-in connectors (§4.4, step execution referenced from §4.1
//! "Apply step via the DBMS plug-in's `PsqlRunner.Run`... Stdout is
//! appended to the event stream as `log` events").

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbmsError {
    #[error("psql exited non-zero: {0}")]
    PsqlFailed(String),
    #[error("liquibase exited non-zero: {0}")]
    LiquibaseFailed(String),
    #[error("connect failed: {0}")]
    ConnectFailed(String),
}

#[derive(Debug, Clone)]
pub struct PsqlStepRequest {
    pub runtime_id: String,
    pub dsn: String,
    /// Exactly one of `file` or `sql`, matching the step's `-f <file>` or
    /// `-c <sql>` origin (§4.1 planning algorithm).
    pub file: Option<String>,
    pub sql: Option<String>,
    pub session_args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LiquibaseStepRequest {
    pub runtime_id: String,
    pub dsn: String,
    pub changelog: String,
    pub changeset_id: String,
    pub changeset_author: String,
    pub changeset_path: String,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub stdout: String,
}

#[async_trait]
pub trait PsqlRunner: Send + Sync + 'static {
    async fn run(&self, req: &PsqlStepRequest) -> Result<StepOutcome, DbmsError>;
}

#[async_trait]
pub trait LiquibaseRunner: Send + Sync + 'static {
    async fn run(&self, req: &LiquibaseStepRequest) -> Result<StepOutcome, DbmsError>;
}

/// A cheap connectivity probe used by `Runtime::wait_for_ready` and a DSN
/// builder shared by both runners.
pub fn dsn_for(host: &str, port: u16, user: &str, dbname: &str) -> String {
    format!("postgresql://{user}@{host}:{port}/{dbname}")
}
