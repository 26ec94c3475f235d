// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Shared types for the sqlrs engine: ids, the catalog data model, wire
//! DTOs, the error taxonomy, image-id canonicalization, the keyed hash used
//! for fingerprints/signatures, path layout, and subprocess helpers.

pub mod engine_state;
pub mod error;
pub mod hash;
pub mod id;
pub mod image;
pub mod model;
pub mod paths;
pub mod proto;
pub mod subprocess;

#[cfg(feature = "test-support")]
pub mod test_support;

pub use error::{Classify, ErrorBody, ErrorKind};
pub use id::{IdGen, ImageId, InstanceId, JobId, SequentialIdGen, ShortId, StateId, TaskId, UuidIdGen};
pub use image::CanonicalImage;
