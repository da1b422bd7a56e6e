//! Error types for the mod merger core.
//!
//! All fallible functions in this crate return [`Result<T>`]. Low-level ZIP
//! errors are converted inside [`crate::archive`] and never leave it; every
//! variant can be classified with [`Error::kind`] so callers can decide whether
//! to continue, skip, or ask the user.

use camino::Utf8PathBuf;
use std::sync::{MutexGuard, PoisonError};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Something expected was absent. Callers log it and keep going.
    NotFound,
    /// Unreadable archive, permission problem, full disk and similar.
    /// The affected mod or file is skipped.
    IoFailure,
    /// The user has to decide how to proceed (retry or abort).
    UserAbortable,
}

/// Errors that can occur while scanning, merging or packaging mods.
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse or serialize JSON (vanilla index).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The archive exists but has no entry with this name.
    #[error("Entry '{entry}' not found in archive {archive}")]
    EntryNotFound { archive: Utf8PathBuf, entry: String },

    /// The archive file itself is missing.
    #[error("Archive not found: {0}")]
    ArchiveNotFound(Utf8PathBuf),

    /// The archive could not be read as a ZIP container.
    #[error("Unreadable archive {path}: {reason}")]
    CorruptArchive { path: Utf8PathBuf, reason: String },

    /// The archive uses a container format that cannot be read (e.g. RAR).
    #[error("Unsupported archive format '{format}' for {path}")]
    UnsupportedArchiveFormat { path: Utf8PathBuf, format: String },

    /// A manifest could not be written.
    #[error("Manifest error for {path}: {reason}")]
    Manifest { path: Utf8PathBuf, reason: String },

    /// The game directory does not contain `Mods`, `Data` and `Localization`.
    #[error("Invalid game directory: {0}")]
    InvalidGameDir(String),

    /// No mod with this folder name is known.
    #[error("Mod not found: {0}")]
    ModNotFound(String),

    /// No conflict bucket exists for this identity.
    #[error("Conflict not found: {0}")]
    ConflictNotFound(String),

    /// A new priority order is not a permutation of the bucket's mods.
    #[error("Invalid priority order for '{identity}': {reason}")]
    InvalidPriorityOrder { identity: String, reason: String },

    /// A directory could not be removed and the user chose to abort.
    #[error("Directory is locked: {0}")]
    DirectoryLocked(Utf8PathBuf),

    /// The external merge tool could not be launched.
    #[error("Merge tool {tool} failed: {message}")]
    MergeTool { tool: Utf8PathBuf, message: String },

    /// Shared state was poisoned by a panicking task.
    #[error("State lock poisoned: {0}")]
    StatePoisoned(String),

    /// Catch-all for errors from injected collaborators.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify this error into the taxonomy the pipeline acts on.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EntryNotFound { .. } | Error::ArchiveNotFound(_) | Error::ModNotFound(_) => {
                ErrorKind::NotFound
            }
            Error::ConflictNotFound(_) => ErrorKind::NotFound,
            Error::DirectoryLocked(_) => ErrorKind::UserAbortable,
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::IoFailure,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

/// Extension trait to convert mutex poison errors into [`Error`].
pub(crate) trait MutexResultExt<'a, T> {
    fn mutex_err(self) -> Result<MutexGuard<'a, T>>;
}

impl<'a, T> MutexResultExt<'a, T> for std::result::Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>> {
    fn mutex_err(self) -> Result<MutexGuard<'a, T>> {
        self.map_err(|e| Error::StatePoisoned(e.to_string()))
    }
}
