//! Update store (C3): one append-only stream of sequence-numbered update
//! files per `(note, instance)`, at
//! `<SD>/notes/<noteId>/updates/<instanceId>/<seq>.yjson`.
//!
//! Sequence numbers are zero-based and must never have a gap *within what
//! an instance has actually written* - but because the replicator may
//! simply not have delivered a file yet, a reader can't tell "gap" apart
//! from "not here yet" by looking at one poll. So reading stops at the
//! first sequence it can't fully account for, and picks back up on a
//! later poll once the replicator catches up. This is what lets the
//! store tolerate delayed, reordered, and batched delivery without ever
//! applying updates out of order.

use std::path::{Path, PathBuf};

use crate::error::{QuillsyncError, Result};
use crate::frame::{self, FrameRead};
use crate::fs::FileSystem;
use crate::model::{InstanceId, NoteId, Sequence};

/// Directory holding one instance's update stream for one note.
pub fn update_dir(sd_root: &Path, note: NoteId, instance: InstanceId) -> PathBuf {
    sd_root
        .join("notes")
        .join(note.to_string())
        .join("updates")
        .join(instance.to_string())
}

/// Path to a single sequence's update file.
pub fn update_path(sd_root: &Path, note: NoteId, instance: InstanceId, seq: Sequence) -> PathBuf {
    update_dir(sd_root, note, instance).join(format!("{seq}.yjson"))
}

/// Append `payload` (a yrs update's raw bytes) as the next sequence in
/// this instance's own stream. Returns the sequence number it was written
/// at. Fails with [`QuillsyncError::Invariant`] if that sequence's file
/// somehow already exists - it never should, since only this instance
/// ever writes here.
pub fn append<FS: FileSystem>(
    fs: &FS,
    sd_root: &Path,
    note: NoteId,
    instance: InstanceId,
    seq: Sequence,
    payload: &[u8],
) -> Result<()> {
    let path = update_path(sd_root, note, instance, seq);
    if let Some(parent) = path.parent() {
        fs.create_dir_all(parent).map_err(QuillsyncError::Io)?;
    }
    let framed = frame::encode(payload);
    fs.create_new(&path, &framed).map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            QuillsyncError::Invariant(format!(
                "update file already exists at sequence {seq} for note {note} instance {instance}"
            ))
        } else {
            QuillsyncError::FileWrite { path: path.clone(), source: e }
        }
    })
}

/// One successfully loaded update.
#[derive(Debug, Clone)]
pub struct LoadedUpdate {
    pub sequence: Sequence,
    pub payload: Vec<u8>,
}

/// Result of scanning one instance's update stream starting at `from`.
#[derive(Debug, Default)]
pub struct LoadResult {
    /// Complete updates found, in sequence order.
    pub updates: Vec<LoadedUpdate>,
    /// The next sequence number not yet accounted for - either missing
    /// from disk or still incomplete. Resume scanning from here next poll.
    pub resume_at: Sequence,
    /// Paths quarantined because their frame flag byte was invalid.
    pub quarantined: Vec<PathBuf>,
}

/// Scan `instance`'s update stream for `note`, starting at sequence
/// `from`, stopping at the first sequence that is missing, incomplete, or
/// corrupt. Corrupt files are renamed aside (`.corrupt` suffix) so they
/// never shadow a subsequent correctly-delivered retry, and are reported
/// in [`LoadResult::quarantined`] rather than failing the whole scan.
pub fn load_from<FS: FileSystem>(
    fs: &FS,
    sd_root: &Path,
    note: NoteId,
    instance: InstanceId,
    from: Sequence,
) -> Result<LoadResult> {
    let mut result = LoadResult { resume_at: from, ..Default::default() };
    let mut seq = from;
    loop {
        let path = update_path(sd_root, note, instance, seq);
        if !fs.exists(&path) {
            break;
        }
        let bytes = fs.read(&path).map_err(|source| QuillsyncError::FileRead {
            path: path.clone(),
            source,
        })?;
        match frame::decode(&bytes, &path) {
            Ok(FrameRead::Complete(payload)) => {
                result.updates.push(LoadedUpdate { sequence: seq, payload });
                seq += 1;
                result.resume_at = seq;
            }
            Ok(FrameRead::Incomplete) => break,
            Err(QuillsyncError::CorruptFrame { message, .. }) => {
                let quarantined = quarantine(fs, &path)?;
                log::warn!(
                    "quarantined corrupt update {path:?} for note {note} instance {instance}: {message}"
                );
                result.quarantined.push(quarantined);
                break;
            }
            Err(other) => return Err(other),
        }
    }
    Ok(result)
}

fn quarantine<FS: FileSystem>(fs: &FS, path: &Path) -> Result<PathBuf> {
    let mut quarantined = path.as_os_str().to_os_string();
    quarantined.push(".corrupt");
    let quarantined = PathBuf::from(quarantined);
    fs.rename(path, &quarantined)
        .map_err(|source| QuillsyncError::FileWrite { path: path.to_path_buf(), source })?;
    Ok(quarantined)
}

/// List the instance subdirectories present under `<SD>/notes/<noteId>/updates/`,
/// i.e. every instance that has ever written updates for this note.
pub fn known_instances<FS: FileSystem>(
    fs: &FS,
    sd_root: &Path,
    note: NoteId,
) -> Result<Vec<InstanceId>> {
    let dir = sd_root.join("notes").join(note.to_string()).join("updates");
    if !fs.exists(&dir) {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs.list_dir(&dir).map_err(QuillsyncError::Io)? {
        if fs.is_dir(&entry)
            && let Some(name) = entry.file_name().and_then(|n| n.to_str())
            && let Ok(id) = name.parse()
        {
            out.push(id);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;
    use std::path::Path;

    #[test]
    fn append_then_load_round_trips() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let instance = InstanceId::new();

        append(&fs, sd, note, instance, 0, b"update-0").unwrap();
        append(&fs, sd, note, instance, 1, b"update-1").unwrap();

        let result = load_from(&fs, sd, note, instance, 0).unwrap();
        assert_eq!(result.updates.len(), 2);
        assert_eq!(result.updates[0].payload, b"update-0");
        assert_eq!(result.resume_at, 2);
        assert!(result.quarantined.is_empty());
    }

    #[test]
    fn missing_sequence_stops_the_scan() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let instance = InstanceId::new();

        append(&fs, sd, note, instance, 0, b"update-0").unwrap();
        // sequence 1 never delivered yet; sequence 2 arrived early (replicator reorder)
        append(&fs, sd, note, instance, 2, b"update-2").unwrap();

        let result = load_from(&fs, sd, note, instance, 0).unwrap();
        assert_eq!(result.updates.len(), 1);
        assert_eq!(result.resume_at, 1);
    }

    #[test]
    fn incomplete_frame_stops_the_scan_without_erroring() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let instance = InstanceId::new();

        append(&fs, sd, note, instance, 0, b"update-0").unwrap();
        let torn_path = update_path(sd, note, instance, 1);
        fs.write_atomic(&torn_path, &[0x00, 1, 2]).unwrap();

        let result = load_from(&fs, sd, note, instance, 0).unwrap();
        assert_eq!(result.updates.len(), 1);
        assert_eq!(result.resume_at, 1);
    }

    #[test]
    fn corrupt_frame_is_quarantined_not_fatal() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let instance = InstanceId::new();

        let bad_path = update_path(sd, note, instance, 0);
        fs.write_atomic(&bad_path, &[0xff, 1, 2]).unwrap();

        let result = load_from(&fs, sd, note, instance, 0).unwrap();
        assert!(result.updates.is_empty());
        assert_eq!(result.quarantined.len(), 1);
        assert!(!fs.exists(&bad_path));
    }

    #[test]
    fn resuming_from_a_later_point_skips_earlier_files() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let instance = InstanceId::new();

        for i in 0..5 {
            append(&fs, sd, note, instance, i, format!("u{i}").as_bytes()).unwrap();
        }

        let result = load_from(&fs, sd, note, instance, 3).unwrap();
        assert_eq!(result.updates.len(), 2);
        assert_eq!(result.updates[0].sequence, 3);
    }
}
