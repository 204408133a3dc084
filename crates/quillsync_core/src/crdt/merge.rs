//! Merge engine (C5): the only place that turns the on-disk log format
//! (snapshots, packs, updates, scattered across every instance's own
//! sub-directories) into one converged [`NoteDoc`] plus the [`VectorClock`]
//! it represents.
//!
//! yrs updates are idempotent and commutative: applying the same op
//! twice, or applying two updates that partially overlap, converges to
//! the same state regardless of order. That's what lets this engine stay
//! simple - it loads every snapshot it can find (from any instance),
//! every pack, and every raw update still pending above the last
//! contiguous pack, and applies all of it. Nothing needs deduplicating by
//! hand; the CRDT does that.

use std::path::Path;

use crate::config::SyncConfig;
use crate::crdt::note_doc::NoteDoc;
use crate::crdt::{activity, pack, snapshot, update_store};
use crate::error::Result;
use crate::model::{InstanceId, NoteId, ProfileId, Sequence, VectorClock};

/// A fully merged note together with the vector clock it was built from.
pub struct MergeOutcome {
    pub doc: NoteDoc,
    pub clock: VectorClock,
}

/// On-disk accounting for one note, independent of any in-memory state -
/// used by [`crate::sync::handle::NoteInfo`] to answer `getInfo` without
/// needing the note to be open.
#[derive(Debug, Clone, Default)]
pub struct NoteStats {
    /// Number of snapshot files across every instance's `snapshots/` directory.
    pub snapshot_count: u64,
    /// Number of pack files across every instance's `packs/` directory.
    pub pack_count: u64,
    /// Sum of every on-disk file's byte length under this note's directory
    /// (updates, packs, snapshots, activity logs, and root metadata).
    pub total_file_size: u64,
}

/// Walk `<SD>/notes/<noteId>/` and tally pack/snapshot counts and total
/// bytes on disk. Tolerant of missing sub-directories (a brand-new note
/// has no packs or snapshots yet).
pub fn note_stats<FS: crate::fs::FileSystem>(
    fs: &FS,
    sd_root: &Path,
    note: NoteId,
) -> Result<NoteStats> {
    let mut stats = NoteStats::default();
    let note_dir = sd_root.join("notes").join(note.to_string());
    let mut stack = vec![note_dir.clone()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs.list_dir(&dir) else { continue };
        for entry in entries {
            if fs.is_dir(&entry) {
                stack.push(entry);
                continue;
            }
            if let Ok(bytes) = fs.read(&entry) {
                stats.total_file_size += bytes.len() as u64;
            }
            if entry
                .parent()
                .and_then(|p| p.parent())
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                == Some("packs")
            {
                stats.pack_count += 1;
            }
            if entry
                .parent()
                .and_then(|p| p.parent())
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                == Some("snapshots")
            {
                stats.snapshot_count += 1;
            }
        }
    }
    Ok(stats)
}

/// Load and converge one note from every instance's contribution on disk.
pub fn load_note<FS: crate::fs::FileSystem>(
    fs: &FS,
    sd_root: &Path,
    note: NoteId,
) -> Result<MergeOutcome> {
    let doc = NoteDoc::new(note);
    let mut clock = VectorClock::new();

    for loaded in snapshot::load_all(fs, sd_root, note)? {
        doc.apply_update(&loaded.payload)?;
    }

    for instance in update_store::known_instances(fs, sd_root, note)? {
        let packs = pack::load_all(fs, sd_root, note, instance)?;
        for p in &packs {
            for u in &p.updates {
                doc.apply_update(&u.data)?;
            }
            clock.observe(instance, p.hi);
        }

        let ceiling = pack::contiguous_pack_ceiling(&packs).map(|hi| hi + 1).unwrap_or(0);
        let loaded = update_store::load_from(fs, sd_root, note, instance, ceiling)?;
        for u in &loaded.updates {
            doc.apply_update(&u.payload)?;
            clock.observe(instance, u.sequence);
        }
    }

    Ok(MergeOutcome { doc, clock })
}

/// The next free sequence number in `instance`'s own update stream for
/// `note`, accounting for whatever has already been folded into packs.
pub fn next_sequence<FS: crate::fs::FileSystem>(
    fs: &FS,
    sd_root: &Path,
    note: NoteId,
    instance: InstanceId,
) -> Result<Sequence> {
    let packs = pack::load_all(fs, sd_root, note, instance)?;
    let ceiling = pack::contiguous_pack_ceiling(&packs).map(|hi| hi + 1).unwrap_or(0);
    let loaded = update_store::load_from(fs, sd_root, note, instance, ceiling)?;
    Ok(loaded.resume_at)
}

/// Pull in whatever changed on disk since `live` was last refreshed,
/// without discarding any not-yet-persisted local edits `live` already
/// holds. Rebuilds the merged view from disk and applies only the
/// resulting diff - cheap relative to a full note's history once packing
/// and snapshotting keep that history bounded, and safe regardless of
/// what `live` currently contains because yrs updates are idempotent.
pub fn refresh_note<FS: crate::fs::FileSystem>(
    fs: &FS,
    sd_root: &Path,
    live: &NoteDoc,
) -> Result<VectorClock> {
    let outcome = load_note(fs, sd_root, live.id())?;
    let diff = outcome.doc.encode_diff(&live.state_vector());
    if !is_empty_update(&diff) {
        live.apply_update(&diff)?;
    }
    Ok(outcome.clock)
}

/// Record a local edit already applied to `doc`: diff against `sv_before`,
/// append the result as the next update in `instance`'s own stream, and
/// log it to the activity log. Returns the sequence the update was
/// written at, or `None` if `doc` had no observable change since
/// `sv_before` (nothing to persist).
pub fn record_local_change<FS: crate::fs::FileSystem>(
    fs: &FS,
    sd_root: &Path,
    doc: &NoteDoc,
    instance: InstanceId,
    profile: ProfileId,
    sv_before: &yrs::StateVector,
    next_seq: Sequence,
) -> Result<Option<Sequence>> {
    let diff = doc.changes_since(sv_before);
    if is_empty_update(&diff) {
        return Ok(None);
    }

    update_store::append(fs, sd_root, doc.id(), instance, next_seq, &diff)?;
    activity::append(
        fs,
        sd_root,
        profile,
        instance,
        activity::ActivityRecord { note: doc.id(), profile, sequence: next_seq },
    )?;
    Ok(Some(next_seq))
}

/// A yrs update encoding "no changes" is a few fixed header bytes with an
/// empty client-update list; comparing against the known-empty encoding
/// is cheaper and just as correct as decoding to inspect structure.
fn is_empty_update(bytes: &[u8]) -> bool {
    use yrs::updates::encoder::Encode;
    use yrs::{ReadTxn, StateVector, Transact};
    let empty_doc = yrs::Doc::new();
    let txn = empty_doc.transact();
    bytes == txn.encode_state_as_update_v1(&StateVector::default())
}

/// If `instance`'s pending (unpacked) updates for `note` have reached
/// [`SyncConfig::pack_threshold`], fold the oldest contiguous run of them
/// into a new pack and prune the superseded update files.
pub fn maybe_pack<FS: crate::fs::FileSystem>(
    fs: &FS,
    sd_root: &Path,
    note: NoteId,
    instance: InstanceId,
    config: &SyncConfig,
) -> Result<bool> {
    let packs = pack::load_all(fs, sd_root, note, instance)?;
    let ceiling = pack::contiguous_pack_ceiling(&packs).map(|hi| hi + 1).unwrap_or(0);
    let pending = update_store::load_from(fs, sd_root, note, instance, ceiling)?;

    if (pending.updates.len() as u32) < config.pack_threshold {
        return Ok(false);
    }

    let lo = ceiling;
    let hi = pending.updates.last().expect("length checked above").sequence;

    let packed = pending
        .updates
        .iter()
        .map(|u| {
            let path = update_store::update_path(sd_root, note, instance, u.sequence);
            let timestamp = fs.modified_millis(&path).unwrap_or(0);
            pack::PackedUpdate { seq: u.sequence, timestamp, data: u.payload.clone() }
        })
        .collect();

    pack::write(fs, sd_root, note, instance, lo, hi, packed)?;
    pack::prune_packed_updates(fs, sd_root, note, instance, lo, hi)?;
    Ok(true)
}

/// If the total updates contributed so far (packs plus stray updates,
/// across every instance) have reached [`SyncConfig::snapshot_threshold`],
/// write a fresh whole-document snapshot for `instance` at the current
/// merged vector clock, then prune whatever that snapshot supersedes in
/// `instance`'s own directories.
pub fn maybe_snapshot<FS: crate::fs::FileSystem>(
    fs: &FS,
    sd_root: &Path,
    note: NoteId,
    instance: InstanceId,
    config: &SyncConfig,
) -> Result<bool> {
    let outcome = load_note(fs, sd_root, note)?;
    let total: Sequence = outcome.clock.iter().map(|(_, count)| count).sum();
    if total < config.snapshot_threshold as u64 {
        return Ok(false);
    }

    let payload = outcome.doc.encode_full_state();
    snapshot::write(fs, sd_root, note, instance, &outcome.clock, &payload)?;
    snapshot::prune_dominated(fs, sd_root, note, instance, &outcome.clock)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;
    use std::path::Path;

    #[test]
    fn two_instances_editing_independently_converge_after_load() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let profile = ProfileId::new();
        let i1 = InstanceId::new();
        let i2 = InstanceId::new();

        let doc1 = NoteDoc::new(note);
        let sv0 = doc1.state_vector();
        doc1.set_body("hello");
        record_local_change(&fs, sd, &doc1, i1, profile, &sv0, 0).unwrap();

        let doc2 = NoteDoc::new(note);
        let sv0b = doc2.state_vector();
        doc2.set_title("Title from instance two");
        record_local_change(&fs, sd, &doc2, i2, profile, &sv0b, 0).unwrap();

        let merged = load_note(&fs, sd, note).unwrap();
        assert_eq!(merged.doc.body(), "hello");
        assert_eq!(merged.doc.title(), Some("Title from instance two".to_string()));
        assert_eq!(merged.clock.count(i1), 1);
        assert_eq!(merged.clock.count(i2), 1);
    }

    #[test]
    fn record_local_change_is_a_noop_without_edits() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let profile = ProfileId::new();
        let instance = InstanceId::new();

        let doc = NoteDoc::new(note);
        let sv = doc.state_vector();
        let result = record_local_change(&fs, sd, &doc, instance, profile, &sv, 0).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn maybe_pack_folds_updates_once_threshold_reached() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let profile = ProfileId::new();
        let instance = InstanceId::new();
        let mut config = SyncConfig::default();
        config.pack_threshold = 3;

        let doc = NoteDoc::new(note);
        for i in 0..3u64 {
            let sv = doc.state_vector();
            doc.insert_at(doc.body_len(), &format!("line{i} "));
            record_local_change(&fs, sd, &doc, instance, profile, &sv, i).unwrap();
        }

        let packed = maybe_pack(&fs, sd, note, instance, &config).unwrap();
        assert!(packed);

        let merged = load_note(&fs, sd, note).unwrap();
        assert_eq!(merged.doc.body(), doc.body());
    }

    #[test]
    fn maybe_snapshot_converges_and_prunes() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let profile = ProfileId::new();
        let instance = InstanceId::new();
        let mut config = SyncConfig::default();
        config.snapshot_threshold = 2;

        let doc = NoteDoc::new(note);
        for i in 0..2u64 {
            let sv = doc.state_vector();
            doc.insert_at(doc.body_len(), "x");
            record_local_change(&fs, sd, &doc, instance, profile, &sv, i).unwrap();
        }

        let took = maybe_snapshot(&fs, sd, note, instance, &config).unwrap();
        assert!(took);

        let merged = load_note(&fs, sd, note).unwrap();
        assert_eq!(merged.doc.body(), "xx");
    }

    #[test]
    fn note_stats_counts_packs_and_snapshots() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let note = NoteId::new();
        let instance = InstanceId::new();

        pack::write(
            &fs,
            sd,
            note,
            instance,
            0,
            63,
            vec![pack::PackedUpdate { seq: 0, timestamp: 0, data: b"pack-payload".to_vec() }],
        )
        .unwrap();
        let mut clock = VectorClock::new();
        clock.observe(instance, 64);
        snapshot::write(&fs, sd, note, instance, &clock, b"snapshot-payload").unwrap();

        let stats = note_stats(&fs, sd, note).unwrap();
        assert_eq!(stats.pack_count, 1);
        assert_eq!(stats.snapshot_count, 1);
        assert!(stats.total_file_size > 0);
    }

    #[test]
    fn note_stats_tolerates_a_brand_new_note() {
        let fs = InMemoryFileSystem::new();
        let stats = note_stats(&fs, Path::new("/sd"), NoteId::new()).unwrap();
        assert_eq!(stats.pack_count, 0);
        assert_eq!(stats.snapshot_count, 0);
        assert_eq!(stats.total_file_size, 0);
    }
}
