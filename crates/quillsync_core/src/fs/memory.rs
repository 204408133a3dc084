//! In-memory filesystem, used both by unit tests and by the fuzz-scenario
//! CLI to simulate the replicator adversary between instances sharing one
//! logical storage directory.

use std::collections::HashMap;
use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::FileSystem;

#[derive(Debug, Clone)]
struct Entry {
    content: Vec<u8>,
    modified_millis: i64,
}

#[derive(Debug, Default)]
struct State {
    files: HashMap<PathBuf, Entry>,
    dirs: std::collections::HashSet<PathBuf>,
    clock: i64,
}

/// A shared, in-memory filesystem.
///
/// Cloning an `InMemoryFileSystem` shares the same backing store - the
/// clones model several instances pointed at the same storage directory
/// through a replicator. Writes from one clone are immediately visible to
/// another unless fault injection (see [`crate::test_utils`]) delays them.
#[derive(Clone)]
pub struct InMemoryFileSystem {
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFileSystem {
    /// Create a fresh, empty in-memory filesystem.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn tick(state: &mut State) -> i64 {
        state.clock += 1;
        state.clock
    }

    fn ensure_parents(state: &mut State, path: &Path) {
        let mut cur = PathBuf::new();
        if let Some(parent) = path.parent() {
            for component in parent.components() {
                cur.push(component);
                state.dirs.insert(cur.clone());
            }
        }
    }
}

impl FileSystem for InMemoryFileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .files
            .get(path)
            .map(|e| e.content.clone())
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("{path:?} not found")))
    }

    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::ensure_parents(&mut state, path);
        let millis = Self::tick(&mut state);
        state.files.insert(
            path.to_path_buf(),
            Entry {
                content: content.to_vec(),
                modified_millis: millis,
            },
        );
        Ok(())
    }

    fn create_new(&self, path: &Path, content: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.files.contains_key(path) {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                format!("{path:?} already exists"),
            ));
        }
        Self::ensure_parents(&mut state, path);
        let millis = Self::tick(&mut state);
        state.files.insert(
            path.to_path_buf(),
            Entry {
                content: content.to_vec(),
                modified_millis: millis,
            },
        );
        Ok(())
    }

    fn append(&self, path: &Path, content: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::ensure_parents(&mut state, path);
        let millis = Self::tick(&mut state);
        let entry = state.files.entry(path.to_path_buf()).or_insert(Entry {
            content: Vec::new(),
            modified_millis: millis,
        });
        entry.content.extend_from_slice(content);
        entry.modified_millis = millis;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("{path:?} not found")))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .files
            .remove(from)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("{from:?} not found")))?;
        Self::ensure_parents(&mut state, to);
        state.files.insert(to.to_path_buf(), entry);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.state.lock().unwrap();
        state.files.contains_key(path) || state.dirs.contains(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let mut cur = PathBuf::new();
        for component in path.components() {
            cur.push(component);
            state.dirs.insert(cur.clone());
        }
        Ok(())
    }

    fn is_dir(&self, path: &Path) -> bool {
        let state = self.state.lock().unwrap();
        state.dirs.contains(path)
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let state = self.state.lock().unwrap();
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for path in state.files.keys().chain(state.dirs.iter()) {
            if path.parent() == Some(dir) && path != dir && seen.insert(path.clone()) {
                out.push(path.clone());
            }
        }
        Ok(out)
    }

    fn modified_millis(&self, path: &Path) -> Option<i64> {
        let state = self.state.lock().unwrap();
        state.files.get(path).map(|e| e.modified_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let fs = InMemoryFileSystem::new();
        fs.write_atomic(Path::new("/sd/a"), b"hi").unwrap();
        assert_eq!(fs.read(Path::new("/sd/a")).unwrap(), b"hi");
    }

    #[test]
    fn create_new_is_exclusive() {
        let fs = InMemoryFileSystem::new();
        fs.create_new(Path::new("/sd/0.yjson"), b"a").unwrap();
        assert!(fs.create_new(Path::new("/sd/0.yjson"), b"b").is_err());
    }

    #[test]
    fn clones_share_state() {
        let fs = InMemoryFileSystem::new();
        let clone = fs.clone();
        fs.write_atomic(Path::new("/sd/a"), b"from-fs").unwrap();
        assert_eq!(clone.read(Path::new("/sd/a")).unwrap(), b"from-fs");
    }

    #[test]
    fn list_dir_finds_direct_children_only() {
        let fs = InMemoryFileSystem::new();
        fs.write_atomic(Path::new("/sd/notes/n1/meta.yjson"), b"{}")
            .unwrap();
        fs.create_dir_all(Path::new("/sd/notes/n1/updates")).unwrap();
        let children = fs.list_dir(Path::new("/sd/notes/n1")).unwrap();
        assert_eq!(children.len(), 2);
    }
}
