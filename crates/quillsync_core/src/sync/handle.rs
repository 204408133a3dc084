//! Embedder-facing API: [`SdHandle`] is what an application holds onto
//! for one storage directory. It owns the open note registry, applies
//! local edits, and starts/stops the background sync loop.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::crdt::{self, NoteDoc};
use crate::error::{QuillsyncError, Result};
use crate::fs::FileSystem;
use crate::model::{InstanceId, NoteId, ProfileId, VectorClock};

use super::sync_loop;

/// A snapshot of one note's synchronized metadata, for listing UIs and for
/// the `getInfo` embedder API.
#[derive(Debug, Clone, Serialize)]
pub struct NoteInfo {
    pub id: NoteId,
    pub title: Option<String>,
    pub folder_id: Option<NoteId>,
    pub tags: Vec<String>,
    pub deleted: bool,
    pub pinned: bool,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub vector_clock: VectorClock,
    pub document_hash: String,
    pub crdt_update_count: u64,
    pub snapshot_count: u64,
    pub pack_count: u64,
    pub total_file_size: u64,
}

/// A callback registered via [`SdHandle::subscribe`]. Fired on the thread
/// doing the refresh (the sync loop's task, or whatever called
/// [`SdHandle::refresh_note`] directly) whenever a note's merged vector
/// clock changes - never on every poll, only on actual convergence.
pub type SubscriberFn = Box<dyn Fn(NoteId, &VectorClock) + Send + Sync>;

struct OpenNote {
    doc: NoteDoc,
    next_seq: AtomicU64,
    /// Vector clock as of the last load/refresh from disk. Kept alongside
    /// the document so `getInfo` can answer without re-walking every
    /// instance's update stream on every call, and so a refresh can tell
    /// whether anything actually changed before notifying subscribers.
    clock: Mutex<VectorClock>,
    subscribers: Mutex<Vec<SubscriberFn>>,
}

impl OpenNote {
    /// Replace the cached vector clock and, only if it actually changed,
    /// fire every registered subscriber (§4.6: "If the merged vector clock
    /// differs from the previously published one, notify embedder
    /// subscribers"). A no-op poll - nothing new on disk - never fires a
    /// callback, matching P2's idempotence requirement.
    fn publish_clock(&self, note: NoteId, new_clock: VectorClock) {
        let mut clock = self.clock.lock().unwrap();
        if *clock == new_clock {
            return;
        }
        *clock = new_clock.clone();
        drop(clock);
        for subscriber in self.subscribers.lock().unwrap().iter() {
            subscriber(note, &new_clock);
        }
    }
}

pub(super) struct Inner<FS> {
    fs: FS,
    sd_root: PathBuf,
    sd_id: crate::model::SdId,
    instance: InstanceId,
    profile: ProfileId,
    config: SyncConfig,
    open: Mutex<HashMap<NoteId, Arc<OpenNote>>>,
    shutdown: Notify,
}

/// A handle onto one open storage directory.
///
/// Cloning is cheap (it's a reference-counted handle to shared state);
/// every clone sees the same open-note registry and the same background
/// sync task.
pub struct SdHandle<FS> {
    inner: Arc<Inner<FS>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<FS: FileSystem + Clone + 'static> SdHandle<FS> {
    /// Open (but do not yet start syncing) a storage directory rooted at
    /// `sd_root`, as `instance` acting on behalf of `profile`.
    pub fn open(fs: FS, sd_root: PathBuf, instance: InstanceId, profile: ProfileId, config: SyncConfig) -> Result<Self> {
        fs.create_dir_all(&sd_root.join("notes")).map_err(QuillsyncError::Io)?;
        let meta = crdt::sd_meta::open_or_create(&fs, &sd_root, now_millis())?;
        Ok(Self {
            inner: Arc::new(Inner {
                fs,
                sd_root,
                sd_id: meta.sd_id,
                instance,
                profile,
                config,
                open: Mutex::new(HashMap::new()),
                shutdown: Notify::new(),
            }),
            task: Mutex::new(None),
        })
    }

    /// This instance's identifier.
    pub fn instance_id(&self) -> InstanceId {
        self.inner.instance
    }

    /// This storage directory's stable identifier, established the first
    /// time any instance opened it.
    pub fn sd_id(&self) -> crate::model::SdId {
        self.inner.sd_id
    }

    /// Root path of the storage directory.
    pub fn root(&self) -> &Path {
        &self.inner.sd_root
    }

    /// List every note this instance can currently see on disk, whether
    /// or not it's open.
    pub fn list_notes(&self) -> Result<Vec<NoteId>> {
        let dir = self.inner.sd_root.join("notes");
        if !self.inner.fs.exists(&dir) {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in self.inner.fs.list_dir(&dir).map_err(QuillsyncError::Io)? {
            if self.inner.fs.is_dir(&entry)
                && let Some(name) = entry.file_name().and_then(|n| n.to_str())
                && let Ok(id) = name.parse()
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Load (or fetch the already-open instance of) a note, converging it
    /// from whatever is on disk. Fails with [`QuillsyncError::NoteNotFound`]
    /// if no instance has ever created this note - use [`Self::create_note`]
    /// for that.
    pub fn open_note(&self, note: NoteId) -> Result<()> {
        if self.inner.open.lock().unwrap().contains_key(&note) {
            return Ok(());
        }
        let note_dir = self.inner.sd_root.join("notes").join(note.to_string());
        if !self.inner.fs.exists(&note_dir) {
            return Err(QuillsyncError::NoteNotFound(note.0));
        }
        self.inner.open_note_from_disk(note)
    }

    /// Create a brand-new note, owned by this instance from the start.
    pub fn create_note(&self) -> Result<NoteId> {
        let id = NoteId::new();
        let doc = NoteDoc::new(id);
        let now = now_millis();
        doc.set_created_at(now);
        doc.set_modified_at(now);

        let mut open = self.inner.open.lock().unwrap();
        open.insert(
            id,
            Arc::new(OpenNote {
                doc,
                next_seq: AtomicU64::new(0),
                clock: Mutex::new(VectorClock::new()),
                subscribers: Mutex::new(Vec::new()),
            }),
        );
        drop(open);

        self.flush_note(id)?;
        Ok(id)
    }

    /// Read-only snapshot of a note's synchronized metadata, matching the
    /// embedder-facing `getInfo` surface: timestamps, tags/pin/delete
    /// state, the note's current vector clock, a content hash, and
    /// on-disk accounting (update/pack/snapshot counts, total bytes).
    pub fn get_info(&self, note: NoteId) -> Result<NoteInfo> {
        self.open_note(note)?;
        let entry = {
            let open = self.inner.open.lock().unwrap();
            Arc::clone(open.get(&note).expect("just opened above"))
        };
        let clock = entry.clock.lock().unwrap().clone();
        let crdt_update_count = clock.iter().map(|(_, count)| count).sum();
        let stats = crdt::note_stats(&self.inner.fs, &self.inner.sd_root, note)?;

        Ok(NoteInfo {
            id: note,
            title: entry.doc.title(),
            folder_id: entry.doc.folder_id(),
            tags: entry.doc.tags(),
            deleted: entry.doc.deleted(),
            pinned: entry.doc.pinned(),
            created_at: entry.doc.created_at(),
            modified_at: entry.doc.modified_at(),
            document_hash: entry.doc.content_hash(),
            vector_clock: clock,
            crdt_update_count,
            snapshot_count: stats.snapshot_count,
            pack_count: stats.pack_count,
            total_file_size: stats.total_file_size,
        })
    }

    /// Apply a local edit to an open note via `edit`, then persist and
    /// log whatever changed. `edit` receives the live [`NoteDoc`] and
    /// should call its mutating methods (`set_body`, `insert_at`,
    /// `set_title`, ...) directly.
    pub fn apply_edit(&self, note: NoteId, edit: impl FnOnce(&NoteDoc)) -> Result<()> {
        self.open_note(note)?;
        let entry = {
            let open = self.inner.open.lock().unwrap();
            Arc::clone(open.get(&note).expect("just opened above"))
        };

        entry.doc.set_modified_at(now_millis());
        let sv_before = entry.doc.state_vector();
        edit(&entry.doc);

        let seq = entry.next_seq.load(Ordering::SeqCst);
        let written = crdt::record_local_change(
            &self.inner.fs,
            &self.inner.sd_root,
            &entry.doc,
            self.inner.instance,
            self.inner.profile,
            &sv_before,
            seq,
        )?;
        if written.is_some() {
            entry.next_seq.store(seq + 1, Ordering::SeqCst);
            let mut clock = entry.clock.lock().unwrap().clone();
            clock.observe(self.inner.instance, seq);
            entry.publish_clock(note, clock);
        }
        Ok(())
    }

    fn flush_note(&self, note: NoteId) -> Result<()> {
        let entry = {
            let open = self.inner.open.lock().unwrap();
            Arc::clone(open.get(&note).expect("note must be open"))
        };
        let seq = entry.next_seq.load(Ordering::SeqCst);
        let written = crdt::record_local_change(
            &self.inner.fs,
            &self.inner.sd_root,
            &entry.doc,
            self.inner.instance,
            self.inner.profile,
            &yrs::StateVector::default(),
            seq,
        )?;
        if written.is_some() {
            entry.next_seq.store(seq + 1, Ordering::SeqCst);
            let mut clock = entry.clock.lock().unwrap().clone();
            clock.observe(self.inner.instance, seq);
            entry.publish_clock(note, clock);
        }
        Ok(())
    }

    /// Pull in any changes that landed on disk since a note was last
    /// refreshed. The background sync loop does this automatically for
    /// every open note; call it directly only if you need an up-to-date
    /// read outside the loop's cadence.
    pub fn refresh_note(&self, note: NoteId) -> Result<()> {
        self.open_note(note)?;
        let entry = {
            let open = self.inner.open.lock().unwrap();
            Arc::clone(open.get(&note).expect("just opened above"))
        };
        let clock = crdt::refresh_note(&self.inner.fs, &self.inner.sd_root, &entry.doc)?;
        entry.publish_clock(note, clock);
        Ok(())
    }

    /// Register a callback fired every time `note`'s merged vector clock
    /// changes - i.e. every time a poll or explicit [`Self::refresh_note`]
    /// actually pulls in new bytes from disk, never on a no-op poll. Opens
    /// the note first if it isn't already.
    ///
    /// There's no unsubscribe handle: callbacks live as long as the note
    /// stays open, matching how every embedder this crate ships
    /// (`quillsync_cli`, `quillsync_bridge`) actually uses it - register
    /// once at startup, never torn down mid-session.
    pub fn subscribe(&self, note: NoteId, callback: impl Fn(NoteId, &VectorClock) + Send + Sync + 'static) -> Result<()> {
        self.open_note(note)?;
        let open = self.inner.open.lock().unwrap();
        let entry = open.get(&note).expect("just opened above");
        entry.subscribers.lock().unwrap().push(Box::new(callback));
        Ok(())
    }

    /// Start the background sync loop as a tokio task. No-op if already
    /// running.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(sync_loop::run(inner)));
    }

    /// Signal the sync loop to stop, and wait for it to finish its
    /// current poll and drain. Safe to call even if the loop was never
    /// started.
    pub async fn close(&self) {
        self.inner.shutdown.notify_waiters();
        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl<FS> Inner<FS> {
    pub(super) fn open_note_ids(&self) -> Vec<NoteId> {
        self.open.lock().unwrap().keys().copied().collect()
    }

    pub(super) fn shutdown_signal(&self) -> &Notify {
        &self.shutdown
    }
}

impl<FS: FileSystem> Inner<FS> {
    pub(super) fn with_open_doc<R>(&self, note: NoteId, f: impl FnOnce(&NoteDoc) -> R) -> Option<R> {
        let open = self.open.lock().unwrap();
        open.get(&note).map(|entry| f(&entry.doc))
    }

    /// Converge `note` from disk and insert it into the open-note registry.
    /// Shared by `SdHandle::open_note` (which has already checked the note
    /// directory exists) and `discover_new_notes` (which only ever calls
    /// this for directories it just found by listing disk).
    fn open_note_from_disk(&self, note: NoteId) -> Result<()> {
        let outcome = crdt::load_note(&self.fs, &self.sd_root, note)?;
        let next_seq = crdt::next_sequence(&self.fs, &self.sd_root, note, self.instance)?;
        self.open.lock().unwrap().insert(
            note,
            Arc::new(OpenNote {
                doc: outcome.doc,
                next_seq: AtomicU64::new(next_seq),
                clock: Mutex::new(outcome.clock),
                subscribers: Mutex::new(Vec::new()),
            }),
        );
        Ok(())
    }

    /// Scan `<sd_root>/notes` for note directories not yet in the open-note
    /// registry - i.e. notes a peer instance created since this instance
    /// last looked - and open each one, converging it from disk exactly
    /// like any other `open_note` call. Realizes §4.6's "enumerate note
    /// directories whose mtime advanced since last scan" at the directory-
    /// existence granularity: `FileSystem::modified_millis` only tracks
    /// per-file mtimes (see its doc comment), not whole-directory mtimes,
    /// so there is no reliable per-directory timestamp to diff against
    /// across both the real and in-memory filesystem implementations.
    /// Already-open notes are re-merged unconditionally every poll instead
    /// (see `sync_loop::poll_one_note`), which is equivalent in effect since
    /// the merge itself is idempotent (P2) - a poll with nothing new on
    /// disk for an already-open note costs a cheap no-op merge rather than
    /// being skipped by a finer-grained mtime check.
    pub(super) fn discover_new_notes(&self) -> Result<()> {
        let dir = self.sd_root.join("notes");
        if !self.fs.exists(&dir) {
            return Ok(());
        }
        for entry in self.fs.list_dir(&dir).map_err(QuillsyncError::Io)? {
            if !self.fs.is_dir(&entry) {
                continue;
            }
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else { continue };
            let Ok(note) = name.parse::<NoteId>() else { continue };
            if self.open.lock().unwrap().contains_key(&note) {
                continue;
            }
            self.open_note_from_disk(note)?;
        }
        Ok(())
    }

    /// Refresh an open note from disk and update its cached vector clock
    /// to match, so `getInfo` reflects convergence the background loop
    /// just picked up rather than only the state as of the last `open`.
    pub(super) fn refresh_open_note(&self, note: NoteId) -> Option<Result<()>> {
        let entry = {
            let open = self.open.lock().unwrap();
            open.get(&note).cloned()
        }?;
        Some((|| {
            let clock = crdt::refresh_note(&self.fs, &self.sd_root, &entry.doc)?;
            entry.publish_clock(note, clock);
            Ok(())
        })())
    }

    pub(super) fn fs(&self) -> &FS {
        &self.fs
    }

    pub(super) fn sd_root(&self) -> &Path {
        &self.sd_root
    }

    pub(super) fn instance(&self) -> InstanceId {
        self.instance
    }

    pub(super) fn config(&self) -> &SyncConfig {
        &self.config
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;

    #[test]
    fn discover_new_notes_opens_directories_created_by_a_peer() {
        let fs = InMemoryFileSystem::new();
        let creator =
            SdHandle::open(fs.clone(), PathBuf::from("/sd"), InstanceId::new(), ProfileId::new(), SyncConfig::default())
                .unwrap();
        let discoverer =
            SdHandle::open(fs, PathBuf::from("/sd"), InstanceId::new(), ProfileId::new(), SyncConfig::default())
                .unwrap();

        let note = creator.create_note().unwrap();
        creator.apply_edit(note, |doc| doc.set_title("created after discoverer opened the SD")).unwrap();

        // Nothing has ever touched `note` through `discoverer`'s own API -
        // only `discover_new_notes` (what the sync loop calls every poll)
        // should be able to find and open it.
        assert!(!discoverer.inner.open.lock().unwrap().contains_key(&note));
        discoverer.inner.discover_new_notes().unwrap();

        assert!(discoverer.inner.open.lock().unwrap().contains_key(&note));
        assert_eq!(
            discoverer.get_info(note).unwrap().title.as_deref(),
            Some("created after discoverer opened the SD")
        );
    }

    #[test]
    fn discover_new_notes_is_a_no_op_on_an_empty_sd() {
        let fs = InMemoryFileSystem::new();
        let handle = SdHandle::open(fs, PathBuf::from("/sd"), InstanceId::new(), ProfileId::new(), SyncConfig::default())
            .unwrap();
        handle.inner.discover_new_notes().unwrap();
        assert!(handle.inner.open.lock().unwrap().is_empty());
    }
}
