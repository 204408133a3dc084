//! Test-only helpers for simulating the sloppy-sync adversary: a
//! filesystem that can be told to hold specific paths back from reads
//! (delayed delivery) and that makes it easy to plant torn or corrupt
//! frames directly.

use std::collections::HashSet;
use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::fs::{FileSystem, InMemoryFileSystem};

/// Wraps an [`InMemoryFileSystem`], letting a test hide specific paths
/// from reads and listings until explicitly released - standing in for a
/// replicator that hasn't finished delivering those files yet.
#[derive(Clone)]
pub struct DelayedDeliveryFileSystem {
    inner: InMemoryFileSystem,
    held: Arc<Mutex<HashSet<PathBuf>>>,
}

impl DelayedDeliveryFileSystem {
    /// Wrap `inner`, initially delivering everything immediately.
    pub fn new(inner: InMemoryFileSystem) -> Self {
        Self { inner, held: Arc::new(Mutex::new(HashSet::new())) }
    }

    /// Hide `path` from subsequent reads/listings, as if the replicator
    /// had not delivered it yet. Writes to held paths still succeed
    /// (this models a write the replicator is uploading, not yet
    /// downloaded by other instances), so this is meant to be called
    /// from the perspective of a *different* instance than the writer.
    pub fn hold(&self, path: impl Into<PathBuf>) {
        self.held.lock().unwrap().insert(path.into());
    }

    /// Make `path` visible again.
    pub fn release(&self, path: &Path) {
        self.held.lock().unwrap().remove(path);
    }

    /// Release everything currently held back.
    pub fn release_all(&self) {
        self.held.lock().unwrap().clear();
    }

    fn is_held(&self, path: &Path) -> bool {
        self.held.lock().unwrap().contains(path)
    }
}

impl FileSystem for DelayedDeliveryFileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        if self.is_held(path) {
            return Err(Error::new(ErrorKind::NotFound, "held back by replicator"));
        }
        self.inner.read(path)
    }

    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        self.inner.write_atomic(path, content)
    }

    fn create_new(&self, path: &Path, content: &[u8]) -> Result<()> {
        self.inner.create_new(path, content)
    }

    fn append(&self, path: &Path, content: &[u8]) -> Result<()> {
        self.inner.append(path, content)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.inner.remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.rename(from, to)
    }

    fn exists(&self, path: &Path) -> bool {
        !self.is_held(path) && self.inner.exists(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.inner.create_dir_all(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.inner.is_dir(path)
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = self.inner.list_dir(dir)?;
        Ok(entries.into_iter().filter(|p| !self.is_held(p)).collect())
    }

    fn modified_millis(&self, path: &Path) -> Option<i64> {
        if self.is_held(path) {
            return None;
        }
        self.inner.modified_millis(path)
    }
}

/// Write an incomplete frame directly, bypassing [`crate::frame::encode`],
/// for tests that need to plant a torn write.
pub fn write_torn_frame<FS: FileSystem>(fs: &FS, path: &Path, partial_payload: &[u8]) {
    let mut bytes = vec![0x00];
    bytes.extend_from_slice(partial_payload);
    fs.write_atomic(path, &bytes).expect("in-memory write should not fail");
}

/// Write a frame with an invalid flag byte directly, for tests that need
/// to plant corruption.
pub fn write_corrupt_frame<FS: FileSystem>(fs: &FS, path: &Path, payload: &[u8]) {
    let mut bytes = vec![0xee];
    bytes.extend_from_slice(payload);
    fs.write_atomic(path, &bytes).expect("in-memory write should not fail");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_path_is_invisible_until_released() {
        let fs = DelayedDeliveryFileSystem::new(InMemoryFileSystem::new());
        fs.write_atomic(Path::new("/a"), b"x").unwrap();
        fs.hold(Path::new("/a"));

        assert!(!fs.exists(Path::new("/a")));
        assert!(fs.read(Path::new("/a")).is_err());

        fs.release(Path::new("/a"));
        assert!(fs.exists(Path::new("/a")));
        assert_eq!(fs.read(Path::new("/a")).unwrap(), b"x");
    }

    #[test]
    fn list_dir_hides_held_entries() {
        let fs = DelayedDeliveryFileSystem::new(InMemoryFileSystem::new());
        fs.write_atomic(Path::new("/dir/a"), b"x").unwrap();
        fs.write_atomic(Path::new("/dir/b"), b"y").unwrap();
        fs.hold(Path::new("/dir/b"));

        let entries = fs.list_dir(Path::new("/dir")).unwrap();
        assert_eq!(entries, vec![PathBuf::from("/dir/a")]);
    }
}
