//! Snapshot engine (part of C4): periodically writes the whole document
//! state to `<SD>/notes/<noteId>/snapshots/<instanceId>/<vectorClockHash>.yjson`,
//! named for the stable hash of the vector clock it represents.
//!
//! Snapshots let a fresh instance (or one that's been offline long
//! enough that its peers have packed well past where it last caught up)
//! load one file instead of walking every instance's update/pack history
//! from scratch. A snapshot is only ever written by the instance whose
//! directory it lives under, at a vector clock *that instance* has
//! actually reached - it is never a peer's merged view, since only the
//! owning instance may write there.

use std::path::{Path, PathBuf};

use crate::error::{QuillsyncError, Result};
use crate::frame::{self, FrameRead};
use crate::fs::FileSystem;
use crate::model::{InstanceId, NoteId, VectorClock};

/// Directory holding one instance's snapshots for one note.
pub fn snapshot_dir(sd_root: &Path, note: NoteId, instance: InstanceId) -> PathBuf {
    sd_root.join("notes").join(note.to_string()).join("snapshots").join(instance.to_string())
}

/// Path to the snapshot for vector clock `at`, named by its stable hash.
pub fn snapshot_path(sd_root: &Path, note: NoteId, instance: InstanceId, at: &VectorClock) -> PathBuf {
    snapshot_dir(sd_root, note, instance).join(format!("{}.yjson", at.stable_hash()))
}

/// A snapshot as loaded from disk: the vector clock hash it was written
/// under (its filename stem) and the full document state it encodes.
#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    pub hash: String,
    pub payload: Vec<u8>,
}

/// Write a whole-document snapshot at vector clock `at`.
pub fn write<FS: FileSystem>(
    fs: &FS,
    sd_root: &Path,
    note: NoteId,
    instance: InstanceId,
    at: &VectorClock,
    payload: &[u8],
) -> Result<()> {
    let path = snapshot_path(sd_root, note, instance, at);
    if let Some(parent) = path.parent() {
        fs.create_dir_all(parent).map_err(QuillsyncError::Io)?;
    }
    let framed = frame::encode(payload);
    fs.write_atomic(&path, &framed)
        .map_err(|source| QuillsyncError::FileWrite { path, source })
}

/// Load every complete snapshot under `<SD>/notes/<noteId>/snapshots/` -
/// from every instance, since the best snapshot to start a merge from may
/// belong to any peer, not just the reading instance.
pub fn load_all<FS: FileSystem>(
    fs: &FS,
    sd_root: &Path,
    note: NoteId,
) -> Result<Vec<LoadedSnapshot>> {
    let root = sd_root.join("notes").join(note.to_string()).join("snapshots");
    if !fs.exists(&root) {
        return Ok(Vec::new());
    }

    let mut snapshots = Vec::new();
    for instance_dir in fs.list_dir(&root).map_err(QuillsyncError::Io)? {
        if !fs.is_dir(&instance_dir) {
            continue;
        }
        for entry in fs.list_dir(&instance_dir).map_err(QuillsyncError::Io)? {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else { continue };
            let Some(hash) = name.strip_suffix(".yjson") else { continue };

            let bytes = fs.read(&entry).map_err(|source| QuillsyncError::FileRead {
                path: entry.clone(),
                source,
            })?;
            match frame::decode(&bytes, &entry) {
                Ok(FrameRead::Complete(payload)) => {
                    snapshots.push(LoadedSnapshot { hash: hash.to_string(), payload })
                }
                Ok(FrameRead::Incomplete) => continue,
                Err(QuillsyncError::CorruptFrame { message, .. }) => {
                    let mut quarantined = entry.as_os_str().to_os_string();
                    quarantined.push(".corrupt");
                    fs.rename(&entry, &PathBuf::from(quarantined)).map_err(|source| {
                        QuillsyncError::FileWrite { path: entry.clone(), source }
                    })?;
                    log::warn!("quarantined corrupt snapshot {entry:?}: {message}");
                }
                Err(other) => return Err(other),
            }
        }
    }
    Ok(snapshots)
}

/// Remove updates, packs, and (other) snapshots for `instance` that are
/// strictly dominated by the vector clock a newly written snapshot
/// represents - they can no longer contribute anything a reader wouldn't
/// already get from the snapshot itself.
pub fn prune_dominated<FS: FileSystem>(
    fs: &FS,
    sd_root: &Path,
    note: NoteId,
    instance: InstanceId,
    new_snapshot_clock: &VectorClock,
) -> Result<()> {
    use super::pack;
    use super::update_store;

    let own_count = new_snapshot_clock.count(instance);

    for pack in pack::load_all(fs, sd_root, note, instance)? {
        if pack.hi < own_count {
            let path = pack::pack_path(sd_root, note, instance, pack.lo, pack.hi);
            fs.remove_file(&path).map_err(|source| QuillsyncError::FileWrite { path, source })?;
        }
    }

    let update_dir = update_store::update_dir(sd_root, note, instance);
    if fs.exists(&update_dir) {
        for entry in fs.list_dir(&update_dir).map_err(QuillsyncError::Io)? {
            let Some(stem) = entry.file_stem().and_then(|s| s.to_str()) else { continue };
            let Ok(seq) = stem.parse::<crate::model::Sequence>() else { continue };
            if seq < own_count {
                fs.remove_file(&entry)
                    .map_err(|source| QuillsyncError::FileWrite { path: entry, source })?;
            }
        }
    }

    let snapshot_root = snapshot_dir(sd_root, note, instance);
    if fs.exists(&snapshot_root) {
        for entry in fs.list_dir(&snapshot_root).map_err(QuillsyncError::Io)? {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else { continue };
            let Some(hash) = name.strip_suffix(".yjson") else { continue };
            if hash != new_snapshot_clock.stable_hash() {
                fs.remove_file(&entry)
                    .map_err(|source| QuillsyncError::FileWrite { path: entry, source })?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;
    use std::path::Path;

    #[test]
    fn write_then_load_round_trips() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let instance = InstanceId::new();
        let mut clock = VectorClock::new();
        clock.observe(instance, 255);

        write(&fs, sd, note, instance, &clock, b"full-state").unwrap();

        let snapshots = load_all(&fs, sd, note).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].hash, clock.stable_hash());
        assert_eq!(snapshots[0].payload, b"full-state");
    }

    #[test]
    fn load_all_spans_every_instance_directory() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let a = InstanceId::new();
        let b = InstanceId::new();
        let mut ca = VectorClock::new();
        ca.observe(a, 10);
        let mut cb = VectorClock::new();
        cb.observe(b, 20);

        write(&fs, sd, note, a, &ca, b"a-state").unwrap();
        write(&fs, sd, note, b, &cb, b"b-state").unwrap();

        assert_eq!(load_all(&fs, sd, note).unwrap().len(), 2);
    }

    #[test]
    fn prune_dominated_removes_superseded_updates_and_packs() {
        use super::super::{pack, update_store};

        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let instance = InstanceId::new();

        for i in 0..5 {
            update_store::append(&fs, sd, note, instance, i, b"u").unwrap();
        }
        pack::write(
            &fs,
            sd,
            note,
            instance,
            0,
            2,
            vec![pack::PackedUpdate { seq: 0, timestamp: 0, data: b"packed".to_vec() }],
        )
        .unwrap();

        let mut clock = VectorClock::new();
        clock.observe(instance, 4); // dominates everything up to and including seq 3
        write(&fs, sd, note, instance, &clock, b"full").unwrap();
        prune_dominated(&fs, sd, note, instance, &clock).unwrap();

        assert!(!fs.exists(&pack::pack_path(sd, note, instance, 0, 2)));
        assert!(!fs.exists(&update_store::update_path(sd, note, instance, 3)));
        assert!(fs.exists(&update_store::update_path(sd, note, instance, 4)));
    }
}
