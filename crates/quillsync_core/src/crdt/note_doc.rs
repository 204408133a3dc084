//! Per-note CRDT document: a `yrs::Doc` with a `body` [`TextRef`] and a
//! `meta` [`MapRef`], the unit of convergence for one note.
//!
//! This module only knows about in-memory document state and the yrs wire
//! format. It has no idea how updates reach disk or each other - that's
//! [`crate::crdt::update_store`], [`crate::crdt::pack`], and
//! [`crate::crdt::merge`]. Keeping the boundary here means the same
//! `NoteDoc` serves both the sync loop and any embedder that wants to
//! apply a local edit directly.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Doc, GetString, Map, MapRef, ReadTxn, StateVector, Text, TextRef, Transact, Update,
};

use crate::error::{QuillsyncError, Result};
use crate::model::NoteId;

const BODY_KEY: &str = "body";
const META_KEY: &str = "meta";

const META_TITLE: &str = "title";
const META_FOLDER_ID: &str = "folder_id";
const META_TAGS: &str = "tags";
const META_DELETED: &str = "deleted";
const META_PINNED: &str = "pinned";
const META_CREATED_AT: &str = "created_at";
const META_MODIFIED_AT: &str = "modified_at";

/// One note's CRDT state: body text plus a small map of synchronized
/// metadata (title, folder placement, tags, tombstone).
pub struct NoteDoc {
    id: NoteId,
    doc: Doc,
    body: TextRef,
    meta: MapRef,
}

impl NoteDoc {
    /// Create a brand-new, empty note document.
    pub fn new(id: NoteId) -> Self {
        let doc = Doc::new();
        let (body, meta) = {
            let mut txn = doc.transact_mut();
            (
                txn.get_or_insert_text(BODY_KEY),
                txn.get_or_insert_map(META_KEY),
            )
        };
        Self { id, doc, body, meta }
    }

    /// Rebuild a document by replaying a full history of update frames in
    /// order. Each `update` is the raw bytes of one yrs update (what a
    /// single update file, pack, or snapshot payload contains).
    pub fn from_updates(id: NoteId, updates: impl IntoIterator<Item = Vec<u8>>) -> Result<Self> {
        let note = Self::new(id);
        for bytes in updates {
            note.apply_update(&bytes)?;
        }
        Ok(note)
    }

    /// This note's stable identifier.
    pub fn id(&self) -> NoteId {
        self.id
    }

    // -- body -----------------------------------------------------------

    /// Current body text.
    pub fn body(&self) -> String {
        let txn = self.doc.transact();
        self.body.get_string(&txn)
    }

    /// Replace the body with `new_text`, editing via common prefix/suffix
    /// rather than delete-all-then-insert-all so concurrent edits
    /// elsewhere in the body merge cleanly instead of being clobbered.
    pub fn set_body(&self, new_text: &str) {
        let mut txn = self.doc.transact_mut();
        let old_text = self.body.get_string(&txn);
        if old_text == new_text {
            return;
        }

        let old_chars: Vec<char> = old_text.chars().collect();
        let new_chars: Vec<char> = new_text.chars().collect();

        let common_prefix = old_chars
            .iter()
            .zip(new_chars.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let max_suffix = (old_chars.len() - common_prefix).min(new_chars.len() - common_prefix);
        let common_suffix = (0..max_suffix)
            .take_while(|&i| {
                old_chars[old_chars.len() - 1 - i] == new_chars[new_chars.len() - 1 - i]
            })
            .count();

        let delete_start = common_prefix as u32;
        let delete_len = (old_chars.len() - common_prefix - common_suffix) as u32;
        if delete_len > 0 {
            self.body.remove_range(&mut txn, delete_start, delete_len);
        }

        let insert_slice: String = new_chars[common_prefix..new_chars.len() - common_suffix]
            .iter()
            .collect();
        if !insert_slice.is_empty() {
            self.body.insert(&mut txn, delete_start, &insert_slice);
        }
    }

    /// Insert `text` at character offset `index`.
    pub fn insert_at(&self, index: u32, text: &str) {
        let mut txn = self.doc.transact_mut();
        self.body.insert(&mut txn, index, text);
    }

    /// Delete `len` characters starting at character offset `index`.
    pub fn delete_range(&self, index: u32, len: u32) {
        let mut txn = self.doc.transact_mut();
        self.body.remove_range(&mut txn, index, len);
    }

    /// Number of UTF-16 code units in the body (yrs's native length unit).
    pub fn body_len(&self) -> u32 {
        let txn = self.doc.transact();
        self.body.len(&txn)
    }

    // -- metadata ---------------------------------------------------------

    /// Display title, if set.
    pub fn title(&self) -> Option<String> {
        self.get_meta_string(META_TITLE)
    }

    /// Set the display title.
    pub fn set_title(&self, title: &str) {
        self.set_meta_string(META_TITLE, title);
    }

    /// The folder this note currently belongs to, if any. Folder
    /// membership is entirely derived from this field - there is no
    /// separate folder document.
    pub fn folder_id(&self) -> Option<NoteId> {
        self.get_meta_string(META_FOLDER_ID)
            .and_then(|s| s.parse().ok())
    }

    /// Move this note into `folder`, or to the root if `None`.
    pub fn set_folder_id(&self, folder: Option<NoteId>) {
        let mut txn = self.doc.transact_mut();
        match folder {
            Some(id) => {
                self.meta.insert(&mut txn, META_FOLDER_ID, id.to_string());
            }
            None => {
                self.meta.remove(&mut txn, META_FOLDER_ID);
            }
        }
    }

    /// Free-form tags attached to this note.
    pub fn tags(&self) -> Vec<String> {
        let txn = self.doc.transact();
        match self.meta.get(&txn, META_TAGS) {
            Some(Any::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Any::String(s) => Some(s.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Replace the full tag set.
    pub fn set_tags(&self, tags: &[String]) {
        let mut txn = self.doc.transact_mut();
        let any = Any::Array(tags.iter().cloned().map(Any::from).collect());
        self.meta.insert(&mut txn, META_TAGS, any);
    }

    /// Whether this note is tombstoned. Deleted notes stay in the store
    /// (and keep converging) rather than being physically removed, so
    /// that a delete observed by one instance can't resurrect content a
    /// peer is concurrently editing.
    pub fn deleted(&self) -> bool {
        let txn = self.doc.transact();
        matches!(self.meta.get(&txn, META_DELETED), Some(Any::Bool(true)))
    }

    /// Mark this note deleted (or undeleted).
    pub fn set_deleted(&self, deleted: bool) {
        let mut txn = self.doc.transact_mut();
        self.meta.insert(&mut txn, META_DELETED, deleted);
    }

    /// Whether this note is pinned in the embedder's UI. Synchronized like
    /// any other metadata field so pinning a note on one instance shows up
    /// on every other instance once converged.
    pub fn pinned(&self) -> bool {
        let txn = self.doc.transact();
        matches!(self.meta.get(&txn, META_PINNED), Some(Any::Bool(true)))
    }

    /// Pin (or unpin) this note.
    pub fn set_pinned(&self, pinned: bool) {
        let mut txn = self.doc.transact_mut();
        self.meta.insert(&mut txn, META_PINNED, pinned);
    }

    /// Creation timestamp in milliseconds since the Unix epoch, if set.
    pub fn created_at(&self) -> Option<i64> {
        self.get_meta_i64(META_CREATED_AT)
    }

    /// Set the creation timestamp. Called once, by the creating instance.
    pub fn set_created_at(&self, millis: i64) {
        self.set_meta_i64(META_CREATED_AT, millis);
    }

    /// Last-modified timestamp in milliseconds since the Unix epoch, if set.
    pub fn modified_at(&self) -> Option<i64> {
        self.get_meta_i64(META_MODIFIED_AT)
    }

    /// Set the last-modified timestamp. Callers should bump this on every
    /// locally-originated edit.
    pub fn set_modified_at(&self, millis: i64) {
        self.set_meta_i64(META_MODIFIED_AT, millis);
    }

    fn get_meta_string(&self, key: &str) -> Option<String> {
        let txn = self.doc.transact();
        match self.meta.get(&txn, key) {
            Some(Any::String(s)) => Some(s.to_string()),
            _ => None,
        }
    }

    fn set_meta_string(&self, key: &str, value: &str) {
        let mut txn = self.doc.transact_mut();
        self.meta.insert(&mut txn, key, value);
    }

    fn get_meta_i64(&self, key: &str) -> Option<i64> {
        let txn = self.doc.transact();
        match self.meta.get(&txn, key) {
            Some(Any::Number(n)) => Some(n as i64),
            Some(Any::BigInt(n)) => Some(n),
            _ => None,
        }
    }

    fn set_meta_i64(&self, key: &str, value: i64) {
        let mut txn = self.doc.transact_mut();
        self.meta.insert(&mut txn, key, value);
    }

    // -- encode/decode ----------------------------------------------------

    /// This document's current state vector, for diffing against a peer.
    pub fn state_vector(&self) -> StateVector {
        let txn = self.doc.transact();
        txn.state_vector()
    }

    /// Encode the full document state as a single update (used when
    /// writing a snapshot).
    pub fn encode_full_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Encode only what `self` has beyond `peer_state` (used when packing
    /// a contiguous range of updates down to their net effect).
    pub fn encode_diff(&self, peer_state: &StateVector) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(peer_state)
    }

    /// A stable hash of this document's current full state, for `getInfo`
    /// callers that want a cheap way to tell "did anything change" without
    /// diffing a whole body string.
    pub fn content_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.encode_full_state());
        let digest = hasher.finalize();
        digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Apply a remote or replayed update. Structurally invalid bytes are
    /// reported as [`QuillsyncError::Crdt`] so the caller can quarantine
    /// the source file rather than retry it forever.
    pub fn apply_update(&self, bytes: &[u8]) -> Result<()> {
        let update = Update::decode_v1(bytes)
            .map_err(|e| QuillsyncError::Crdt(format!("update decode failed: {e}")))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| QuillsyncError::Crdt(format!("update apply failed: {e}")))?;
        Ok(())
    }

    /// Capture whatever has changed since `since`, as a single update
    /// blob suitable for appending to this instance's own update stream.
    pub fn changes_since(&self, since: &StateVector) -> Vec<u8> {
        self.encode_diff(since)
    }
}

impl std::fmt::Debug for NoteDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteDoc")
            .field("id", &self.id)
            .field("body_len", &self.body_len())
            .finish_non_exhaustive()
    }
}
