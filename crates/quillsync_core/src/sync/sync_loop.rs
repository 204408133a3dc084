//! The cooperative polling loop (C6): one task per storage directory,
//! woken on a jittered interval, that discovers any note directories a
//! peer created since the last poll, refreshes every open note from
//! disk, and performs this instance's own pack/snapshot maintenance.
//!
//! There is deliberately no filesystem-event watching here - the
//! replicator this store is designed around doesn't reliably deliver
//! change notifications for remote writes, so polling is the only
//! channel that's actually trustworthy. A poll that's mid-flight when
//! shutdown is requested is allowed to finish; the loop only checks for
//! the shutdown signal between polls, never in the middle of one, so a
//! closing instance never leaves a note half-refreshed.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::crdt;
use crate::fs::FileSystem;
use crate::model::NoteId;

use super::handle::Inner;

pub(super) async fn run<FS: FileSystem>(inner: Arc<Inner<FS>>) {
    loop {
        let interval = jittered_interval(&inner);
        tokio::select! {
            _ = inner.shutdown_signal().notified() => {
                log::debug!("sync loop received shutdown signal, draining and exiting");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        if let Err(err) = inner.discover_new_notes() {
            log::warn!("sync poll failed to scan for new note directories: {err}");
        }

        for note in inner.open_note_ids() {
            if let Err(err) = poll_one_note(&inner, note) {
                log::warn!("sync poll failed for note {note}: {err}");
            }
        }
    }
}

fn poll_one_note<FS: FileSystem>(inner: &Inner<FS>, note: NoteId) -> crate::error::Result<()> {
    if let Some(result) = inner.refresh_open_note(note) {
        result?;
    }

    crdt::maybe_pack(inner.fs(), inner.sd_root(), note, inner.instance(), inner.config())?;
    crdt::maybe_snapshot(inner.fs(), inner.sd_root(), note, inner.instance(), inner.config())?;
    Ok(())
}

fn jittered_interval<FS>(inner: &Inner<FS>) -> Duration {
    let config = inner.config();
    let jitter = if config.poll_jitter_millis == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=config.poll_jitter_millis)
    };
    Duration::from_millis(config.poll_interval_millis + jitter)
}
