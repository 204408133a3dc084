//! Pack engine (part of C4): folds a contiguous run of one instance's
//! update files into a single pack file once they pile up, so a late-
//! joining peer (or a peer that was offline for a while) doesn't have to
//! replay hundreds of tiny updates to catch up.
//!
//! A pack lives at `<SD>/notes/<noteId>/packs/<instanceId>/<lo>-<hi>.yjson`
//! and holds a structured container listing every update in `lo..=hi` in
//! application order - `{version, instanceId, noteId, sequenceRange,
//! updates: [{seq, timestamp, data}]}` per the on-disk wire format. Packs
//! are written only by the instance that owns the range (never a peer
//! repacking someone else's updates), and only after every update file in
//! the range has been observed as a complete frame - packing a range that
//! includes a still-incomplete file would silently drop whatever the
//! replicator hadn't finished delivering yet.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{QuillsyncError, Result};
use crate::frame::{self, FrameRead};
use crate::fs::FileSystem;
use crate::model::{InstanceId, NoteId, Sequence};

const PACK_VERSION: u32 = 1;

/// Directory holding one instance's packs for one note.
pub fn pack_dir(sd_root: &Path, note: NoteId, instance: InstanceId) -> PathBuf {
    sd_root.join("notes").join(note.to_string()).join("packs").join(instance.to_string())
}

/// Path to the pack covering sequences `lo..=hi`.
pub fn pack_path(sd_root: &Path, note: NoteId, instance: InstanceId, lo: Sequence, hi: Sequence) -> PathBuf {
    pack_dir(sd_root, note, instance).join(format!("{lo}-{hi}.yjson"))
}

/// One update folded into a pack: its own sequence, the timestamp it was
/// originally written at (best-effort, from the superseded update file's
/// mtime), and its raw CRDT update bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackedUpdate {
    pub seq: Sequence,
    pub timestamp: i64,
    pub data: Vec<u8>,
}

/// The on-disk pack container shape (§6): `{version, instanceId, noteId,
/// sequenceRange, updates}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PackContainer {
    version: u32,
    instance_id: InstanceId,
    note_id: NoteId,
    sequence_range: (Sequence, Sequence),
    updates: Vec<PackedUpdate>,
}

/// One pack's contents after a successful load.
#[derive(Debug, Clone)]
pub struct LoadedPack {
    pub lo: Sequence,
    pub hi: Sequence,
    pub updates: Vec<PackedUpdate>,
}

/// Write a pack covering `lo..=hi` holding `updates`, which must be sorted
/// by `seq` and span exactly `lo..=hi` with no gaps.
pub fn write<FS: FileSystem>(
    fs: &FS,
    sd_root: &Path,
    note: NoteId,
    instance: InstanceId,
    lo: Sequence,
    hi: Sequence,
    updates: Vec<PackedUpdate>,
) -> Result<()> {
    let path = pack_path(sd_root, note, instance, lo, hi);
    if let Some(parent) = path.parent() {
        fs.create_dir_all(parent).map_err(QuillsyncError::Io)?;
    }
    let container = PackContainer {
        version: PACK_VERSION,
        instance_id: instance,
        note_id: note,
        sequence_range: (lo, hi),
        updates,
    };
    let payload = serde_json::to_vec(&container)
        .map_err(|e| QuillsyncError::Crdt(format!("pack encode failed: {e}")))?;
    let framed = frame::encode(&payload);
    fs.write_atomic(&path, &framed)
        .map_err(|source| QuillsyncError::FileWrite { path, source })
}

fn parse_range(file_name: &str) -> Option<(Sequence, Sequence)> {
    let stem = file_name.strip_suffix(".yjson")?;
    let (lo, hi) = stem.split_once('-')?;
    Some((lo.parse().ok()?, hi.parse().ok()?))
}

/// Load every complete pack for `instance`'s stream, sorted by `lo`.
/// Torn packs are treated as not-yet-delivered (skipped, not quarantined -
/// the source updates are still around, so a torn pack just means this
/// poll falls back to the slower per-update path for that range).
/// Corrupt packs - either a bad frame flag or a container that fails to
/// parse as JSON - are quarantined the same way corrupt updates are.
pub fn load_all<FS: FileSystem>(
    fs: &FS,
    sd_root: &Path,
    note: NoteId,
    instance: InstanceId,
) -> Result<Vec<LoadedPack>> {
    let dir = pack_dir(sd_root, note, instance);
    if !fs.exists(&dir) {
        return Ok(Vec::new());
    }

    let mut packs = Vec::new();
    for entry in fs.list_dir(&dir).map_err(QuillsyncError::Io)? {
        let Some(name) = entry.file_name().and_then(|n| n.to_str()) else { continue };
        let Some((lo, hi)) = parse_range(name) else { continue };

        let bytes = fs.read(&entry).map_err(|source| QuillsyncError::FileRead {
            path: entry.clone(),
            source,
        })?;
        match frame::decode(&bytes, &entry) {
            Ok(FrameRead::Complete(payload)) => match serde_json::from_slice::<PackContainer>(&payload) {
                Ok(container) => packs.push(LoadedPack { lo, hi, updates: container.updates }),
                Err(e) => {
                    quarantine(fs, &entry, &format!("pack container decode failed: {e}"))?;
                }
            },
            Ok(FrameRead::Incomplete) => continue,
            Err(QuillsyncError::CorruptFrame { message, .. }) => {
                quarantine(fs, &entry, &message)?;
            }
            Err(other) => return Err(other),
        }
    }
    packs.sort_by_key(|p| p.lo);
    Ok(packs)
}

fn quarantine<FS: FileSystem>(fs: &FS, entry: &Path, message: &str) -> Result<()> {
    let mut quarantined = entry.as_os_str().to_os_string();
    quarantined.push(".corrupt");
    fs.rename(entry, &PathBuf::from(quarantined))
        .map_err(|source| QuillsyncError::FileWrite { path: entry.to_path_buf(), source })?;
    log::warn!("quarantined corrupt pack {entry:?}: {message}");
    Ok(())
}

/// Highest sequence already covered by a contiguous run of packs starting
/// at 0, or `None` if no pack covers sequence 0. Updates at or below this
/// sequence can be pruned once the pack that covers them is confirmed
/// written; updates above it still need to be read individually.
pub fn contiguous_pack_ceiling(packs: &[LoadedPack]) -> Option<Sequence> {
    let mut ceiling = None;
    let mut expect = 0;
    for pack in packs {
        if pack.lo != expect {
            break;
        }
        ceiling = Some(pack.hi);
        expect = pack.hi + 1;
    }
    ceiling
}

/// Remove the raw update files superseded by a pack covering `lo..=hi`.
/// Only safe to call after the pack has been durably written and its
/// frame confirmed complete.
pub fn prune_packed_updates<FS: FileSystem>(
    fs: &FS,
    sd_root: &Path,
    note: NoteId,
    instance: InstanceId,
    lo: Sequence,
    hi: Sequence,
) -> Result<()> {
    use super::update_store::update_path;
    for seq in lo..=hi {
        let path = update_path(sd_root, note, instance, seq);
        if fs.exists(&path) {
            fs.remove_file(&path).map_err(|source| QuillsyncError::FileWrite { path, source })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;
    use std::path::Path;

    fn updates(seqs: impl IntoIterator<Item = Sequence>) -> Vec<PackedUpdate> {
        seqs.into_iter().map(|seq| PackedUpdate { seq, timestamp: 1000 + seq as i64, data: vec![seq as u8] }).collect()
    }

    #[test]
    fn write_then_load_round_trips() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let instance = InstanceId::new();

        write(&fs, sd, note, instance, 0, 1, updates(0..=1)).unwrap();

        let packs = load_all(&fs, sd, note, instance).unwrap();
        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].lo, 0);
        assert_eq!(packs[0].hi, 1);
        assert_eq!(packs[0].updates.len(), 2);
        assert_eq!(packs[0].updates[0].seq, 0);
        assert_eq!(packs[0].updates[0].data, vec![0u8]);
        assert_eq!(packs[0].updates[1].timestamp, 1001);
    }

    #[test]
    fn contiguous_ceiling_stops_at_first_gap() {
        let packs = vec![
            LoadedPack { lo: 0, hi: 63, updates: vec![] },
            LoadedPack { lo: 64, hi: 127, updates: vec![] },
            LoadedPack { lo: 200, hi: 263, updates: vec![] },
        ];
        assert_eq!(contiguous_pack_ceiling(&packs), Some(127));
    }

    #[test]
    fn contiguous_ceiling_none_without_sequence_zero() {
        let packs = vec![LoadedPack { lo: 64, hi: 127, updates: vec![] }];
        assert_eq!(contiguous_pack_ceiling(&packs), None);
    }

    #[test]
    fn prune_removes_only_the_covered_range() {
        use super::super::update_store;

        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let instance = InstanceId::new();

        for i in 0..5 {
            update_store::append(&fs, sd, note, instance, i, b"u").unwrap();
        }
        prune_packed_updates(&fs, sd, note, instance, 0, 2).unwrap();

        assert!(!fs.exists(&update_store::update_path(sd, note, instance, 0)));
        assert!(!fs.exists(&update_store::update_path(sd, note, instance, 2)));
        assert!(fs.exists(&update_store::update_path(sd, note, instance, 3)));
    }

    #[test]
    fn torn_pack_is_skipped_not_quarantined() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let instance = InstanceId::new();

        let path = pack_path(sd, note, instance, 0, 10);
        fs.write_atomic(&path, &[0x00]).unwrap();

        let packs = load_all(&fs, sd, note, instance).unwrap();
        assert!(packs.is_empty());
        assert!(fs.exists(&path));
    }

    #[test]
    fn malformed_container_is_quarantined_not_fatal() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let instance = InstanceId::new();

        let path = pack_path(sd, note, instance, 0, 10);
        let framed = frame::encode(b"not json");
        fs.write_atomic(&path, &framed).unwrap();

        let packs = load_all(&fs, sd, note, instance).unwrap();
        assert!(packs.is_empty());
        assert!(!fs.exists(&path));
    }
}
