//! The embedded catalog: event log, materialized state, snapshotting, and
//! the Registry/Queue Store operations layered on top (§4.2).

mod catalog;
mod error;
mod event;
mod filters;
mod migration;
mod queue;
mod registry;
mod snapshot;
mod state;
mod wal;

pub use catalog::{normalize_id_prefix, Catalog};
pub use error::CatalogError;
pub use event::{CatalogEvent, JobPatch};
pub use filters::{InstanceFilter, JobFilter, NameFilter, StateFilter};
pub use migration::{Migration, MigrationError, MigrationRegistry};
pub use snapshot::{Snapshot, SnapshotError};
pub use state::{MaterializedState, CURRENT_SNAPSHOT_VERSION};
pub use wal::{Wal, WalEntry, WalError};
