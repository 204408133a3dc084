//! The CRDT layer: per-note document state (`note_doc`), the on-disk log
//! components that make it durable and shareable (`activity`,
//! `update_store`, `pack`, `snapshot`), and the engine that converges them
//! all back into one document (`merge`).

pub mod activity;
pub mod merge;
pub mod note_doc;
pub mod pack;
pub mod sd_meta;
pub mod snapshot;
pub mod update_store;

pub use merge::{
    load_note, maybe_pack, maybe_snapshot, next_sequence, note_stats, record_local_change,
    refresh_note, MergeOutcome, NoteStats,
};
pub use note_doc::NoteDoc;
pub use sd_meta::SdMeta;
