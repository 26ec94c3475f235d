// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Adapters for external I/O: the container runtime, DBMS step runners,
//! and the live-connection probe (§4.4, §4.5).

pub mod conntracker;
pub mod dbms;
pub mod docker_runtime;
pub mod runtime;
pub mod runtime_dbms;

pub use conntracker::{ConnTracker, ConnTrackerError, RuntimeConnTracker};
pub use dbms::{DbmsError, LiquibaseRunner, LiquibaseStepRequest, PsqlRunner, PsqlStepRequest, StepOutcome};
pub use docker_runtime::DockerRuntime;
pub use runtime::{ExecRequest, Runtime, RuntimeError, RuntimeInstance, StartRequest};
pub use runtime_dbms::{RuntimeLiquibaseRunner, RuntimePsqlRunner};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake_dbms;
#[cfg(any(test, feature = "test-support"))]
mod fake_runtime;

#[cfg(any(test, feature = "test-support"))]
pub use conntracker::FakeConnTracker;
#[cfg(any(test, feature = "test-support"))]
pub use fake_dbms::{FakeLiquibaseRunner, FakePsqlRunner};
#[cfg(any(test, feature = "test-support"))]
pub use fake_runtime::{FakeRuntime, RuntimeCall};
