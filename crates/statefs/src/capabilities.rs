//! Static per-backend capability flags (§4.3).

/// Capability flags the Prepare Coordinator consults before and after a
/// snapshot. All three are fixed per backend, never per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The database must be stopped before `snapshot()` is durable.
    pub requires_db_stop: bool,
    /// `clone_dir()` returns a mount/subvolume the caller can write into.
    pub supports_writable_clone: bool,
    /// The backend can transfer snapshots out-of-band (btrfs send/receive).
    pub supports_send_receive: bool,
}

impl Capabilities {
    pub const BTRFS: Capabilities = Capabilities {
        requires_db_stop: false,
        supports_writable_clone: true,
        supports_send_receive: true,
    };

    pub const OVERLAY: Capabilities = Capabilities {
        requires_db_stop: true,
        supports_writable_clone: true,
        supports_send_receive: false,
    };

    pub const COPY: Capabilities = Capabilities {
        requires_db_stop: true,
        supports_writable_clone: false,
        supports_send_receive: false,
    };
}
