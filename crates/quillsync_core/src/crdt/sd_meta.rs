//! Root-level `meta.yjson`: the small, frame-wrapped file that identifies
//! a Storage Directory itself, as distinct from any one note inside it.
//!
//! Unlike note metadata (which lives in each note's own CRDT `meta` map
//! and converges like everything else), this file is written once, by
//! whichever instance first opens the SD, and never mutated afterwards -
//! there's nothing here for two instances to disagree about.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{QuillsyncError, Result};
use crate::fs::FileSystem;
use crate::model::SdId;

const CURRENT_FORMAT_VERSION: u32 = 1;

/// Root metadata for one Storage Directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdMeta {
    /// This SD's stable identifier.
    pub sd_id: SdId,
    /// When this SD was first opened, in milliseconds since the Unix epoch.
    pub created_at: i64,
    /// On-disk layout version. Only version 1 is defined today; this
    /// field exists so a future layout change has somewhere to record
    /// itself without guessing from file shapes.
    pub format_version: u32,
}

impl SdMeta {
    fn new(created_at: i64) -> Self {
        Self { sd_id: SdId::new(), created_at, format_version: CURRENT_FORMAT_VERSION }
    }
}

fn meta_path(sd_root: &Path) -> PathBuf {
    sd_root.join("meta.yjson")
}

/// Open an SD's root metadata, creating it (with a fresh `sdId`) if this
/// is the first time anything has opened this root. A `meta.yjson` that
/// exists but fails to parse is reported as
/// [`QuillsyncError::NotAStorageDirectory`] rather than silently
/// overwritten - a transient corruption here must not regenerate the
/// SD's identity out from under an operator.
pub fn open_or_create<FS: FileSystem>(fs: &FS, sd_root: &Path, now_millis: i64) -> Result<SdMeta> {
    let path = meta_path(sd_root);
    if !fs.exists(&path) {
        let meta = SdMeta::new(now_millis);
        write(fs, sd_root, &meta)?;
        return Ok(meta);
    }

    let bytes = fs.read(&path).map_err(|source| QuillsyncError::FileRead { path: path.clone(), source })?;
    let frame = crate::frame::decode(&bytes, &path)
        .map_err(|_| QuillsyncError::NotAStorageDirectory(sd_root.to_path_buf()))?;
    let payload = match frame {
        crate::frame::FrameRead::Complete(payload) => payload,
        crate::frame::FrameRead::Incomplete => {
            return Err(QuillsyncError::NotAStorageDirectory(sd_root.to_path_buf()));
        }
    };

    serde_json::from_slice(&payload).map_err(|_| QuillsyncError::NotAStorageDirectory(sd_root.to_path_buf()))
}

fn write<FS: FileSystem>(fs: &FS, sd_root: &Path, meta: &SdMeta) -> Result<()> {
    let path = meta_path(sd_root);
    if let Some(parent) = path.parent() {
        fs.create_dir_all(parent).map_err(QuillsyncError::Io)?;
    }
    let payload = serde_json::to_vec(meta)?;
    let frame = crate::frame::encode(&payload);
    fs.write_atomic(&path, &frame).map_err(|source| QuillsyncError::FileWrite { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;
    use std::path::Path;

    #[test]
    fn first_open_creates_meta_with_fresh_id() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let meta = open_or_create(&fs, sd, 1000).unwrap();
        assert_eq!(meta.created_at, 1000);
        assert_eq!(meta.format_version, 1);
        assert!(fs.exists(&sd.join("meta.yjson")));
    }

    #[test]
    fn reopening_preserves_identity() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        let first = open_or_create(&fs, sd, 1000).unwrap();
        let second = open_or_create(&fs, sd, 2000).unwrap();
        assert_eq!(first.sd_id, second.sd_id);
        assert_eq!(second.created_at, 1000);
    }

    #[test]
    fn torn_meta_file_is_reported_not_overwritten() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        crate::test_utils::write_torn_frame(&fs, &sd.join("meta.yjson"), b"{\"sd");
        let err = open_or_create(&fs, sd, 5000).unwrap_err();
        assert!(matches!(err, QuillsyncError::NotAStorageDirectory(_)));
    }

    #[test]
    fn corrupt_meta_file_is_reported_not_overwritten() {
        let fs = InMemoryFileSystem::new();
        let sd = Path::new("/sd");
        crate::test_utils::write_corrupt_frame(&fs, &sd.join("meta.yjson"), b"{}");
        let err = open_or_create(&fs, sd, 5000).unwrap_err();
        assert!(matches!(err, QuillsyncError::NotAStorageDirectory(_)));
    }
}
