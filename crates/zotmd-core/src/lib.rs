//! zotmd core library
//!
//! Keeps a directory of markdown files in step with a Zotero library. Each
//! item with a citation key gets one file; generated content sits above a
//! marker line and the user's own notes below it are never touched.
//!
//! # Architecture
//!
//! - **Remote**: [`RemoteLibrary`] is the read-only view of the library
//! - **State store**: SQLite records of what was last written per item
//! - **Detector**: compares fingerprints to decide what each item needs
//! - **Reconciler**: atomic writes, relocations and quarantine on disk
//! - **Engine**: drives a run and reports a [`SyncSummary`]
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let options = EngineOptions::from_config(&config)?;
//! let renderer = MarkdownRenderer::new();
//! let mut engine = SyncEngine::new(options, &client, &renderer);
//! let summary = engine.run(SyncMode::Incremental)?;
//! ```

pub mod annotations;
pub mod config;
pub mod detector;
pub mod document;
pub mod error;
pub mod hashing;
pub mod lock;
pub mod models;
pub mod reconciler;
pub mod remote;
pub mod render;
pub mod storage;
pub mod sync;

pub use annotations::{merge, ChangeKind, MergeResult, MergedAnnotation};
pub use config::{Config, DeletionBehavior, LibraryType};
pub use detector::{classify, Action, Fingerprints, SyncMode};
pub use document::{Regions, SplitError, USER_REGION_MARKER};
pub use error::{ItemError, ItemErrorKind, SyncError};
pub use lock::{CancelFlag, RunLock};
pub use models::{
    AnnotationKind, Attachment, ItemMetadata, RecordStatus, RemoteAnnotation, RemoteItem,
    SyncStateRecord,
};
pub use reconciler::{FileError, FileReconciler};
pub use remote::{RemoteError, RemoteLibrary, RetryPolicy};
pub use render::{ItemContext, MarkdownRenderer, RenderError, Renderer};
pub use storage::{StoreError, StoreStats, SyncStateStore};
pub use sync::{EngineOptions, FullSyncReason, SyncEngine, SyncPhase, SyncSummary};
