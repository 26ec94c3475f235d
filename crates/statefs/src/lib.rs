#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! StateFS: the snapshot/clone filesystem abstraction (§4.3).
//!
//! Backend-agnostic interface over `btrfs` subvolumes, `overlayfs`, and
//! plain `cp -a`, each advertising a fixed [`Capabilities`] flag set the
//! Prepare Coordinator consults to decide whether a database must be
//! stopped before a snapshot is durable.

mod backend;
mod capabilities;
mod clone_guard;
mod error;
pub mod layout;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use backend::btrfs::BtrfsStateFs;
pub use backend::copy::CopyStateFs;
pub use backend::overlay::OverlayStateFs;
pub use capabilities::Capabilities;
pub use clone_guard::CloneGuard;
pub use error::StateFsError;

use std::path::Path;

use async_trait::async_trait;

/// Snapshot/clone abstraction over a state-store root. One implementation
/// per backend; the daemon picks one at startup based on configuration and
/// wires the same `Arc<dyn StateFs>` into every caller.
#[async_trait]
pub trait StateFs: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Validates that `root` is usable by this backend (exists, writable,
    /// and for `btrfs`, is itself a btrfs mount).
    async fn validate(&self, root: &Path) -> Result<(), StateFsError>;

    /// Ensures `path` exists as a directory (or subvolume, for backends
    /// that have one). Returns `true` if it was newly created, so the
    /// caller knows whether to run `Runtime.InitBase` into it.
    async fn ensure_dir(&self, path: &Path) -> Result<bool, StateFsError>;

    /// Produces a writable clone of `src` at `dest`. The returned guard
    /// owns cleanup of the clone; dropping it without calling
    /// [`CloneGuard::keep`] removes the clone best-effort.
    async fn clone_dir(&self, src: &Path, dest: &Path) -> Result<CloneGuard, StateFsError>;

    /// Commits the directory at `src` as an immutable snapshot at `dest`.
    /// Atomic where the backend supports it (btrfs subvolume snapshot,
    /// `rename`-committed temp directory otherwise).
    async fn snapshot(&self, src: &Path, dest: &Path) -> Result<(), StateFsError>;

    /// Removes whatever lives at `path` (subvolume, mount, or plain
    /// directory), falling back to `rm -rf` semantics when the backend
    /// can't recognize `path` as one of its own artifacts.
    async fn remove_path(&self, path: &Path) -> Result<(), StateFsError>;
}
