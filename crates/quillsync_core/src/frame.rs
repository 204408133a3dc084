//! The on-disk frame codec (C1).
//!
//! Every file this crate writes - update, pack, snapshot, or activity log
//! line - is wrapped in a one-byte flag prefix so that a reader racing an
//! in-progress (possibly torn) write from the replicator can tell the
//! difference between "not written yet", "fully written", and "garbage".
//!
//! ```text
//! byte 0       bytes 1..
//! ----------   -------------------
//! 0x00/0x01    payload (opaque)
//! ```
//!
//! A writer always produces `0x01` frames: the flag and payload are written
//! to a temp file in the same directory, fsynced, then renamed into place,
//! so any frame a reader can observe is atomically either absent or whole.
//! `0x00` exists for forward compatibility with writers that pre-allocate a
//! placeholder before filling it in; this crate never emits one itself but
//! treats any file it reads starting with `0x00` as legitimately incomplete
//! rather than corrupt.

use crate::error::{QuillsyncError, Result};

const FLAG_INCOMPLETE: u8 = 0x00;
const FLAG_COMPLETE: u8 = 0x01;

/// Outcome of reading one frame off disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead {
    /// Flag byte was `0x01`; payload bytes follow.
    Complete(Vec<u8>),
    /// Flag byte was `0x00`, or the file was empty/shorter than one byte.
    /// The replicator hasn't finished delivering this file yet.
    Incomplete,
}

/// Wrap `payload` in a complete frame ready to be written to disk.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(FLAG_COMPLETE);
    out.extend_from_slice(payload);
    out
}

/// Decode a frame previously read off disk.
///
/// Returns [`QuillsyncError::CorruptFrame`] if the flag byte is anything
/// other than `0x00`/`0x01`; callers must quarantine such a file rather
/// than retry it. `path` is used only to annotate the error.
pub fn decode(bytes: &[u8], path: &std::path::Path) -> Result<FrameRead> {
    match bytes.first() {
        None => Ok(FrameRead::Incomplete),
        Some(&FLAG_INCOMPLETE) => Ok(FrameRead::Incomplete),
        Some(&FLAG_COMPLETE) => Ok(FrameRead::Complete(bytes[1..].to_vec())),
        Some(&other) => Err(QuillsyncError::CorruptFrame {
            path: path.to_path_buf(),
            message: format!("unrecognized frame flag byte 0x{other:02x}"),
        }),
    }
}
