//! Sync errors
//!
//! [`SyncError`] aborts a run. [`ItemError`] is scoped to one item and is
//! collected into the run summary instead of being raised.

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::storage::StoreError;

/// Fatal errors that abort a sync run
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transient remote failures persisted past the retry budget
    #[error("remote library unavailable: {0}")]
    RemoteUnavailable(String),

    /// The remote rejected the credentials
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The remote sent something the engine cannot use
    #[error("invalid remote response: {0}")]
    RemoteInvalid(String),

    #[error("state store error: {0}")]
    Store(#[source] StoreError),

    /// The store cannot be trusted; nothing was modified
    #[error("state store is unusable: {0}")]
    StoreCorruption(#[source] StoreError),

    /// Another run holds the run lock
    #[error("another sync is already running{}", pid_suffix(*.pid))]
    Locked { path: PathBuf, pid: Option<u32> },

    /// The lock file could not be created or locked
    #[error("failed to acquire run lock '{path}': {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The output directory could not be created
    #[error("cannot prepare output directory '{path}': {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn pid_suffix(pid: Option<u32>) -> String {
    pid.map(|p| format!(" (pid {})", p)).unwrap_or_default()
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        if err.is_corruption() {
            SyncError::StoreCorruption(err)
        } else {
            SyncError::Store(err)
        }
    }
}

impl SyncError {
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            SyncError::StoreCorruption(err) | SyncError::Store(err) => err.recovery_suggestion(),
            SyncError::Auth(_) => Some("Check `api_key` and `library_id` with `zotmd config show`."),
            SyncError::Locked { .. } => {
                Some("Wait for the other run to finish; a lock left by a crashed run is released automatically.")
            }
            SyncError::RemoteUnavailable(_) => Some("Try again later; the cursor was not advanced."),
            _ => None,
        }
    }
}

/// What went wrong with a single item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemErrorKind {
    /// Fetching the item's annotations failed
    Remote,
    Render,
    /// The existing file could not be split into regions
    Split,
    /// A file operation failed
    Write,
    /// The target path belongs to another live item
    Collision,
    Store,
}

impl fmt::Display for ItemErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemErrorKind::Remote => "remote",
            ItemErrorKind::Render => "render",
            ItemErrorKind::Split => "split",
            ItemErrorKind::Write => "write",
            ItemErrorKind::Collision => "collision",
            ItemErrorKind::Store => "store",
        };
        f.write_str(s)
    }
}

/// A per-item failure recorded in the run summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub item_key: String,
    pub citation_key: Option<String>,
    pub kind: ItemErrorKind,
    pub message: String,
}

impl ItemError {
    pub fn new(
        item_key: impl Into<String>,
        citation_key: Option<&str>,
        kind: ItemErrorKind,
        message: impl fmt::Display,
    ) -> Self {
        Self {
            item_key: item_key.into(),
            citation_key: citation_key.map(str::to_string),
            kind,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.citation_key {
            Some(key) => write!(f, "{} ({}): {} error: {}", key, self.item_key, self.kind, self.message),
            None => write!(f, "{}: {} error: {}", self.item_key, self.kind, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_are_classified() {
        let err: SyncError = StoreError::Corrupt {
            path: PathBuf::from("zotmd.db"),
            details: "malformed".to_string(),
        }
        .into();
        assert!(matches!(err, SyncError::StoreCorruption(_)));

        let err: SyncError = StoreError::CursorRegression {
            current: 5,
            requested: 1,
        }
        .into();
        assert!(matches!(err, SyncError::Store(_)));
    }

    #[test]
    fn test_locked_display() {
        let err = SyncError::Locked {
            path: PathBuf::from("zotmd.lock"),
            pid: Some(4242),
        };
        assert_eq!(err.to_string(), "another sync is already running (pid 4242)");
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_item_error_display() {
        let err = ItemError::new("ABCD1234", Some("smith2020"), ItemErrorKind::Render, "boom");
        assert_eq!(err.to_string(), "smith2020 (ABCD1234): render error: boom");
    }
}
