//! Real filesystem implementation.

use std::fs::{self, File, OpenOptions};
use std::io::{Error, ErrorKind, Result, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::FileSystem;

/// Default soft deadline for a single file read (§5): the replicator can
/// leave a file handle "downloading" indefinitely, so a read that takes
/// longer than this is treated as transient-failed rather than awaited
/// forever.
const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(5);

/// Maps [`FileSystem`] directly onto `std::fs`.
#[derive(Debug, Clone, Copy)]
pub struct RealFileSystem {
    read_deadline: Duration,
}

impl Default for RealFileSystem {
    fn default() -> Self {
        Self { read_deadline: DEFAULT_READ_DEADLINE }
    }
}

impl RealFileSystem {
    /// A real filesystem with the default 5-second soft read deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// A real filesystem whose per-file read deadline matches a
    /// [`crate::config::SyncConfig::read_deadline`] (or any other custom
    /// value), rather than the built-in default.
    pub fn with_read_deadline(read_deadline: Duration) -> Self {
        Self { read_deadline }
    }

    fn temp_path_for(path: &Path) -> PathBuf {
        let mut os_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        os_name.push(format!(".tmp-{}", uuid::Uuid::new_v4()));
        path.with_file_name(os_name)
    }
}

impl FileSystem for RealFileSystem {
    /// Reads happen on a helper thread so a file the replicator is still
    /// "downloading" (open but not yet flushed) can't hang this call
    /// forever: past `read_deadline`, the read is abandoned and reported
    /// as [`ErrorKind::TimedOut`], which callers treat the same as any
    /// other transient read failure - retried on the next poll.
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = path.to_path_buf();
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(fs::read(&path));
        });
        match rx.recv_timeout(self.read_deadline) {
            Ok(result) => result,
            Err(_) => Err(Error::new(
                ErrorKind::TimedOut,
                format!("read exceeded soft deadline of {:?}", self.read_deadline),
            )),
        }
    }

    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        let tmp = Self::temp_path_for(path);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(content)?;
            file.sync_all()?;
        }
        let result = fs::rename(&tmp, path);
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn create_new(&self, path: &Path, content: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(content)?;
        file.sync_all()
    }

    fn append(&self, path: &Path, content: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(content)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if !from.exists() {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("source not found: {from:?}"),
            ));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(from, to)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        if dir.is_dir() {
            for entry in fs::read_dir(dir)? {
                entries.push(entry?.path());
            }
        }
        Ok(entries)
    }

    fn modified_millis(&self, path: &Path) -> Option<i64> {
        fs::metadata(path)
            .ok()?
            .modified()
            .ok()?
            .duration_since(std::time::UNIX_EPOCH)
            .ok()
            .map(|d| d.as_millis() as i64)
    }
}
