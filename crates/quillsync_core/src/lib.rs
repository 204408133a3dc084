#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Vector clocks and the identifier newtypes everything else is keyed by.
pub mod model;

/// The on-disk frame codec (C1): flag-byte framing for torn-write safety.
pub mod frame;

/// Filesystem abstraction, with a real and an in-memory implementation.
pub mod fs;

/// Sync loop tunables (poll interval, jitter, pack/snapshot thresholds).
pub mod config;

/// Unified error type for the note store.
pub mod error;

/// The CRDT layer: per-note documents, the on-disk log, and the merge engine.
pub mod crdt;

/// The cooperative sync loop (C6) and the embedder-facing handle.
pub mod sync;

/// Fault-injection helpers for simulating the sloppy-sync adversary.
/// Gated behind the `test-utils` feature so integration tests in `tests/`
/// can use it too, not just this crate's own `#[cfg(test)]` modules.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{QuillsyncError, Result};
pub use model::{InstanceId, NoteId, ProfileId, SdId, Sequence, VectorClock};
