use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Unified error type for the note store.
///
/// Most variants are recoverable and are logged at `warn` by the caller;
/// [`QuillsyncError::Invariant`] and [`QuillsyncError::Fatal`] are not -
/// they mean the store must stop making progress until an operator looks.
#[derive(Debug, Error)]
pub enum QuillsyncError {
    /// General I/O failure not otherwise documented here.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A read failed for a specific file.
    #[error("failed to read '{path}': {source}")]
    FileRead {
        /// Path that failed to be read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// A write failed for a specific file.
    #[error("failed to write '{path}': {source}")]
    FileWrite {
        /// Path that failed to be written.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// A frame's flag byte was neither `0x00` nor `0x01`, or its payload
    /// failed to parse. The caller must quarantine the file, never trust it.
    #[error("corrupt frame in '{path}': {message}")]
    CorruptFrame {
        /// Path to the corrupt file.
        path: PathBuf,
        /// Description of what failed to decode.
        message: String,
    },

    /// The CRDT library rejected a decode or apply operation.
    #[error("CRDT error: {0}")]
    Crdt(String),

    /// A gap was detected in an instance's own sequence numbers at startup,
    /// or some other on-disk invariant does not hold. The instance must
    /// refuse to issue new writes until an operator intervenes.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Non-recoverable failure: the storage directory disappeared or
    /// became read-only. The sync loop flushes and stops.
    #[error("fatal storage directory error at '{path}': {message}")]
    Fatal {
        /// Storage directory path.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Serialization error for pack/snapshot container payloads.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The storage directory root does not look like a valid SD (missing
    /// or malformed root metadata).
    #[error("not a storage directory: '{0}'")]
    NotAStorageDirectory(PathBuf),

    /// Requested note does not exist in this storage directory.
    #[error("note not found: '{0}'")]
    NoteNotFound(uuid::Uuid),
}

/// Result type alias for quillsync_core operations.
pub type Result<T> = std::result::Result<T, QuillsyncError>;

/// A serializable representation of [`QuillsyncError`], for embedders that
/// cross an IPC or HTTP boundary and need a plain JSON error shape.
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name.
    pub kind: String,
    /// Human-readable error message.
    pub message: String,
    /// Associated path, if applicable.
    pub path: Option<PathBuf>,
}

impl From<&QuillsyncError> for SerializableError {
    fn from(err: &QuillsyncError) -> Self {
        let kind = match err {
            QuillsyncError::Io(_) => "Io",
            QuillsyncError::FileRead { .. } => "FileRead",
            QuillsyncError::FileWrite { .. } => "FileWrite",
            QuillsyncError::CorruptFrame { .. } => "CorruptFrame",
            QuillsyncError::Crdt(_) => "Crdt",
            QuillsyncError::Invariant(_) => "Invariant",
            QuillsyncError::Fatal { .. } => "Fatal",
            QuillsyncError::Json(_) => "Json",
            QuillsyncError::NotAStorageDirectory(_) => "NotAStorageDirectory",
            QuillsyncError::NoteNotFound(_) => "NoteNotFound",
        }
        .to_string();

        let path = match err {
            QuillsyncError::FileRead { path, .. } => Some(path.clone()),
            QuillsyncError::FileWrite { path, .. } => Some(path.clone()),
            QuillsyncError::CorruptFrame { path, .. } => Some(path.clone()),
            QuillsyncError::Fatal { path, .. } => Some(path.clone()),
            QuillsyncError::NotAStorageDirectory(path) => Some(path.clone()),
            _ => None,
        };

        Self {
            kind,
            message: err.to_string(),
            path,
        }
    }
}

impl From<QuillsyncError> for SerializableError {
    fn from(err: QuillsyncError) -> Self {
        SerializableError::from(&err)
    }
}

impl QuillsyncError {
    /// Convert to a serializable representation for IPC/HTTP boundaries.
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }

    /// True for errors that should stop the sync loop entirely rather than
    /// be retried on the next poll.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QuillsyncError::Fatal { .. } | QuillsyncError::Invariant(_))
    }
}
