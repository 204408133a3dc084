//! Activity log (C2): an append-only, per-(profile, instance) ledger of
//! which `(note, sequence)` pairs an instance has produced.
//!
//! The log exists so that an embedder can answer "what changed and who
//! touched it" without replaying every update - useful for activity feeds
//! and for the merge engine's own bookkeeping of what it has already
//! folded into a note. It is not itself load-bearing for convergence: a
//! note converges from its updates/packs/snapshots regardless of whether
//! its activity log is present, torn, or missing.
//!
//! One file per `(profileId, instanceId)` pair at
//! `<SD>/notes/<noteId>/activity/<profileId>.<instanceId>.log`, written
//! only by that instance. Lines use the primary grammar
//! `noteId|profileId|seq\n`; a legacy underscore-delimited grammar
//! (`noteId_profileId_seq\n`) is still accepted when reading, since older
//! writers may have left lines in that form.

use std::path::{Path, PathBuf};

use crate::error::{QuillsyncError, Result};
use crate::fs::FileSystem;
use crate::model::{InstanceId, NoteId, ProfileId, Sequence};

/// One line of an activity log: this profile/instance produced `sequence`
/// for `note`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityRecord {
    pub note: NoteId,
    pub profile: ProfileId,
    pub sequence: Sequence,
}

impl ActivityRecord {
    fn to_line(self) -> String {
        format!("{}|{}|{}\n", self.note, self.profile, self.sequence)
    }

    fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            return None;
        }
        let parts: Vec<&str> = if line.contains('|') {
            line.split('|').collect()
        } else {
            line.split('_').collect()
        };
        let [note, profile, seq] = parts[..] else {
            return None;
        };
        Some(Self {
            note: note.parse().ok()?,
            profile: profile.parse().ok()?,
            sequence: seq.parse().ok()?,
        })
    }
}

/// Path to the activity log owned by `(profile, instance)` for `note`.
pub fn activity_log_path(
    sd_root: &Path,
    note: NoteId,
    profile: ProfileId,
    instance: InstanceId,
) -> PathBuf {
    sd_root
        .join("notes")
        .join(note.to_string())
        .join("activity")
        .join(format!("{profile}.{instance}.log"))
}

/// Append one record to this instance's own activity log for `note`.
/// Callers must never call this for an instance other than their own -
/// the sole-writer-per-instance discipline applies to activity logs too.
pub fn append<FS: FileSystem>(
    fs: &FS,
    sd_root: &Path,
    profile: ProfileId,
    instance: InstanceId,
    record: ActivityRecord,
) -> Result<()> {
    let path = activity_log_path(sd_root, record.note, profile, instance);
    if let Some(parent) = path.parent() {
        fs.create_dir_all(parent).map_err(QuillsyncError::Io)?;
    }
    fs.append(&path, record.to_line().as_bytes())
        .map_err(|source| QuillsyncError::FileWrite { path, source })
}

/// Read and parse every well-formed line of one activity log file.
/// Malformed lines (partial writes the replicator is still delivering,
/// or genuine corruption) are silently skipped - the activity log is
/// advisory, so losing a line costs an entry in a feed, never
/// convergence.
pub fn read<FS: FileSystem>(fs: &FS, path: &Path) -> Result<Vec<ActivityRecord>> {
    if !fs.exists(path) {
        return Ok(Vec::new());
    }
    let bytes = fs.read(path).map_err(|source| QuillsyncError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(text.lines().filter_map(ActivityRecord::parse_line).collect())
}

/// Read the activity logs of every instance under `<SD>/notes/<noteId>/activity/`.
pub fn read_all_for_note<FS: FileSystem>(
    fs: &FS,
    sd_root: &Path,
    note: NoteId,
) -> Result<Vec<ActivityRecord>> {
    let dir = sd_root.join("notes").join(note.to_string()).join("activity");
    if !fs.exists(&dir) {
        return Ok(Vec::new());
    }
    let mut all = Vec::new();
    for entry in fs.list_dir(&dir).map_err(QuillsyncError::Io)? {
        if entry.extension().and_then(|e| e.to_str()) == Some("log") {
            all.extend(read(fs, &entry)?);
        }
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;
    use std::path::Path;

    #[test]
    fn parses_primary_grammar() {
        let note = NoteId::new();
        let profile = ProfileId::new();
        let line = format!("{note}|{profile}|7\n");
        let record = ActivityRecord::parse_line(&line).unwrap();
        assert_eq!(record.note, note);
        assert_eq!(record.profile, profile);
        assert_eq!(record.sequence, 7);
    }

    #[test]
    fn parses_legacy_underscore_grammar() {
        let note = NoteId::new();
        let profile = ProfileId::new();
        let line = format!("{note}_{profile}_3\n");
        let record = ActivityRecord::parse_line(&line).unwrap();
        assert_eq!(record.sequence, 3);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        assert!(ActivityRecord::parse_line("garbage").is_none());
        assert!(ActivityRecord::parse_line("").is_none());
        assert!(ActivityRecord::parse_line("a|b").is_none());
    }

    #[test]
    fn append_then_read_round_trips() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let profile = ProfileId::new();
        let instance = InstanceId::new();

        append(&fs, sd, profile, instance, ActivityRecord { note, profile, sequence: 0 }).unwrap();
        append(&fs, sd, profile, instance, ActivityRecord { note, profile, sequence: 1 }).unwrap();

        let path = activity_log_path(sd, note, profile, instance);
        let records = read(&fs, &path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].sequence, 1);
    }

    #[test]
    fn read_all_for_note_merges_every_instance() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let profile = ProfileId::new();
        let i1 = InstanceId::new();
        let i2 = InstanceId::new();

        append(&fs, sd, profile, i1, ActivityRecord { note, profile, sequence: 0 }).unwrap();
        append(&fs, sd, profile, i2, ActivityRecord { note, profile, sequence: 0 }).unwrap();

        let all = read_all_for_note(&fs, sd, note).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn missing_log_reads_as_empty() {
        let fs = InMemoryFileSystem::new();
        let path = activity_log_path(Path::new("/sd"), NoteId::new(), ProfileId::new(), InstanceId::new());
        assert!(read(&fs, &path).unwrap().is_empty());
    }
}
