//! Sync-loop configuration.
//!
//! These are the few knobs the store exposes: how often to poll, how much
//! jitter to add so sibling instances don't all wake on the same tick, the
//! pack/snapshot thresholds, and the soft deadline for reading a single
//! file before giving up for this poll. Persisted as JSON next to the
//! storage directory, not inside it - config is per-instance, not shared
//! state subject to convergence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QuillsyncError, Result};
use crate::fs::FileSystem;

/// Tunables for one instance's sync loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Base interval between polls, in milliseconds.
    pub poll_interval_millis: u64,

    /// Maximum random jitter added to each poll interval, in milliseconds,
    /// so that several instances sharing a replicator don't all wake and
    /// write at the same instant.
    pub poll_jitter_millis: u64,

    /// Number of updates accumulated for a note before the pack engine
    /// folds them into a pack file.
    pub pack_threshold: u32,

    /// Number of packs (plus leftover updates) accumulated before the
    /// snapshot engine writes a fresh whole-document snapshot.
    pub snapshot_threshold: u32,

    /// Soft deadline for reading a single update/pack/snapshot file before
    /// the poll moves on and retries it next cycle, in milliseconds. Exists
    /// because the replicator can leave a file handle open indefinitely
    /// while "downloading".
    pub read_deadline_millis: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_millis: 2_000,
            poll_jitter_millis: 500,
            pack_threshold: 64,
            snapshot_threshold: 256,
            read_deadline_millis: 5_000,
        }
    }
}

impl SyncConfig {
    /// The poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    /// The read deadline as a [`Duration`].
    pub fn read_deadline(&self) -> Duration {
        Duration::from_millis(self.read_deadline_millis)
    }

    /// Load config from `path` via `fs`, falling back to [`SyncConfig::default`]
    /// if the file does not exist.
    pub fn load_or_default<FS: FileSystem>(fs: &FS, path: &Path) -> Result<Self> {
        if !fs.exists(path) {
            return Ok(Self::default());
        }
        let bytes = fs.read(path).map_err(|source| QuillsyncError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_slice(&bytes)?;
        Ok(config)
    }

    /// Persist config to `path` via `fs`, creating parent directories as
    /// needed.
    pub fn save<FS: FileSystem>(&self, fs: &FS, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs.create_dir_all(parent)
                .map_err(QuillsyncError::Io)?;
        }
        let bytes = serde_json::to_vec_pretty(self)?;
        fs.write_atomic(path, &bytes)
            .map_err(|source| QuillsyncError::FileWrite {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Conventional config file path for a storage directory's instance,
    /// kept alongside (not inside) `sd_root`.
    pub fn path_for(sd_root: &Path) -> PathBuf {
        sd_root.with_extension("sync-config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;

    #[test]
    fn missing_file_yields_default() {
        let fs = InMemoryFileSystem::new();
        let config = SyncConfig::load_or_default(&fs, Path::new("/sd.sync-config.json")).unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let fs = InMemoryFileSystem::new();
        let path = Path::new("/sd.sync-config.json");
        let mut config = SyncConfig::default();
        config.pack_threshold = 8;
        config.save(&fs, path).unwrap();

        let loaded = SyncConfig::load_or_default(&fs, path).unwrap();
        assert_eq!(loaded.pack_threshold, 8);
    }
}
