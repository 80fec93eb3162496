//! Error types for the update engine and its primitives.

use crate::archive::InvalidReason;
use std::path::PathBuf;

/// Errors produced by the progressive copy/delete/move primitives.
#[derive(Debug, thiserror::Error)]
pub enum FileOpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source is not a directory: {}", .0.display())]
    SourceNotDirectory(PathBuf),

    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("failed to {action} {}: {source}", .path.display())]
    Entry {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("operation aborted")]
    Aborted,
}

impl FileOpError {
    pub(crate) fn entry(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FileOpError::Entry {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Errors produced while opening, testing or extracting an archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("7z error: {0}")]
    SevenZ(String),

    #[error("rar tool error: {0}")]
    Rar(String),

    #[error("archive is invalid: {0}")]
    Invalid(InvalidReason),

    #[error("worker task failed: {0}")]
    Join(String),

    #[error("extraction cancelled")]
    Cancelled,
}

/// Errors produced while downloading a build archive.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {0}")]
    Status(u16),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("insufficient disk space: need {needed} bytes, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("download cancelled")]
    Cancelled,
}

/// Errors produced by the settings store and the build registry.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no configuration directory available")]
    NoConfigDir,
}

/// Errors that end an update session.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("no build list available")]
    NoBuilds,

    #[error("no build selected")]
    NoBuildSelected,

    #[error("build {0} has no download for this platform")]
    BuildNotInstallable(String),

    #[error("game directory is a file: {}", .0.display())]
    TargetIsFile(PathBuf),

    #[error("game directory is not empty and contains no game executable: {}", .0.display())]
    TargetNotEmpty(PathBuf),

    #[error("download failed: {0}")]
    Download(String),

    #[error("downloaded archive is invalid: {0}")]
    InvalidArchive(InvalidReason),

    #[error("could not remove the previous version: {0}")]
    ClearPreviousVersion(String),

    #[error("could not back up the current installation: {0}")]
    Backup(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("no executable found in the extracted build")]
    NoExecutable,

    #[error("could not analyse the new executable: {0}")]
    Analysis(String),

    #[error("could not carry over {what}: {message}")]
    Reconcile { what: String, message: String },

    #[error("no previous version to restore in {}", .0.display())]
    NoPreviousVersion(PathBuf),

    #[error("rollback did not complete: {0}")]
    Rollback(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl UpdateError {
    /// Whether the front-end should offer to restart the whole update.
    pub fn offers_retry(&self) -> bool {
        matches!(
            self,
            UpdateError::Download(_) | UpdateError::Extraction(_) | UpdateError::InvalidArchive(_)
        )
    }
}
