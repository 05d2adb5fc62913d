//! Store error handling
//!
//! Provides typed errors for sync state store operations with descriptive
//! messages and recovery suggestions.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while opening or using the sync state store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to create the directory holding the database
    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Permission denied accessing the database
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The database file exists but is unreadable or fails its integrity check
    #[error("State database at '{path}' is corrupted: {details}")]
    Corrupt { path: PathBuf, details: String },

    /// The database was written by a newer version of ZotMD
    #[error("State database at '{path}' uses schema version {found}, but this build supports up to {supported}")]
    NewerSchema {
        path: PathBuf,
        found: i32,
        supported: i32,
    },

    /// A stored row could not be decoded
    #[error("Invalid row for item '{item_key}': {details}")]
    InvalidRow { item_key: String, details: String },

    /// Attempt to move the library cursor backwards
    #[error("Refusing to move library cursor backwards from {current} to {requested}")]
    CursorRegression { current: i64, requested: i64 },

    /// Another live record already owns the file path
    #[error("File path '{file_path}' is already used by item '{owner}'")]
    PathConflict { file_path: String, owner: String },

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to encode or decode the stored annotation set
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Create an error from an I/O error with path context
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => StoreError::PermissionDenied {
                path,
                source: error,
            },
            _ => StoreError::CreateDirectory {
                path,
                source: error,
            },
        }
    }

    /// Whether the error means the store cannot be trusted at all
    ///
    /// Such errors abort a run before any mutation happens.
    pub fn is_corruption(&self) -> bool {
        match self {
            StoreError::Corrupt { .. }
            | StoreError::NewerSchema { .. }
            | StoreError::InvalidRow { .. } => true,
            StoreError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
            ),
            _ => false,
        }
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StoreError::Corrupt { .. } | StoreError::InvalidRow { .. } => {
                Some("Move the state database aside and run `zotmd sync --full` to rebuild it from the library.")
            }
            StoreError::NewerSchema { .. } => {
                Some("Upgrade ZotMD, or point `db_path` at a different database.")
            }
            StoreError::PermissionDenied { .. } => {
                Some("Check file and directory permissions for the data directory.")
            }
            StoreError::CreateDirectory { .. } => {
                Some("Check that the parent directory exists and you have write permissions.")
            }
            _ => None,
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
