//! In-memory [`PsqlRunner`]/[`LiquibaseRunner`] fakes, recording calls for
//! assertions instead of shelling out.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::dbms::{DbmsError, LiquibaseRunner, LiquibaseStepRequest, PsqlRunner, PsqlStepRequest, StepOutcome};

#[derive(Default)]
pub struct FakePsqlRunner {
    calls: Mutex<Vec<PsqlStepRequest>>,
    fail_next: Mutex<Option<String>>,
}

impl FakePsqlRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock() = Some(message.into());
    }

    pub fn calls(&self) -> Vec<PsqlStepRequest> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl PsqlRunner for FakePsqlRunner {
    async fn run(&self, req: &PsqlStepRequest) -> Result<StepOutcome, DbmsError> {
        self.calls.lock().push(req.clone());
        if let Some(message) = self.fail_next.lock().take() {
            return Err(DbmsError::PsqlFailed(message));
        }
        Ok(StepOutcome {
            stdout: format!("ok: {:?}", req.file.as_deref().or(req.sql.as_deref())),
        })
    }
}

#[derive(Default)]
pub struct FakeLiquibaseRunner {
    calls: Mutex<Vec<LiquibaseStepRequest>>,
}

impl FakeLiquibaseRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<LiquibaseStepRequest> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LiquibaseRunner for FakeLiquibaseRunner {
    async fn run(&self, req: &LiquibaseStepRequest) -> Result<StepOutcome, DbmsError> {
        self.calls.lock().push(req.clone());
        Ok(StepOutcome {
            stdout: format!("changeset {} applied", req.changeset_id),
        })
    }
}
