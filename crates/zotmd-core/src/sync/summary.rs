//! Run summary

use std::time::Duration;

use serde::Serialize;

use crate::annotations::MergeResult;
use crate::detector::SyncMode;
use crate::error::ItemError;

/// Why an incremental request ran as a full sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FullSyncReason {
    /// `--full` was given
    Requested,
    /// No cursor stored yet
    NoCursor,
    /// The renderer fingerprint differs from the last run's
    TemplateChanged,
    /// Too many library versions since the cursor
    VersionGap { gap: i64 },
    /// The library version is lower than the cursor
    VersionRegressed,
}

/// Annotation counts over all items rendered in a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationCounts {
    pub total: usize,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl AnnotationCounts {
    pub fn add(&mut self, merge: &MergeResult) {
        self.total += merge.annotations.len();
        self.added += merge.added();
        self.updated += merge.updated();
        self.removed += merge.removed.len();
    }
}

/// Result of one sync run, reported even on partial failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSummary {
    pub mode: SyncMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_sync_reason: Option<FullSyncReason>,

    /// Items looked at, removals included
    pub processed: usize,
    pub created: usize,
    /// Items whose file content changed
    pub updated: usize,
    /// Items re-rendered to identical bytes
    pub unchanged: usize,
    pub removed: usize,
    /// Items whose fingerprints matched the stored record
    pub skipped: usize,
    /// Items without citation key that were never synced
    pub ineligible: usize,

    pub annotations: AnnotationCounts,

    /// Cursor before the run
    pub start_version: Option<i64>,
    /// Cursor after the run
    pub finish_version: Option<i64>,
    /// Library version reported by the remote
    pub library_version: Option<i64>,
    /// Store mutations committed by this run
    pub store_writes: u64,

    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,

    pub errors: Vec<ItemError>,
    pub warnings: Vec<String>,
    pub cancelled: bool,
}

impl SyncSummary {
    pub fn new(mode: SyncMode, start_version: Option<i64>) -> Self {
        Self {
            mode,
            full_sync_reason: None,
            processed: 0,
            created: 0,
            updated: 0,
            unchanged: 0,
            removed: 0,
            skipped: 0,
            ineligible: 0,
            annotations: AnnotationCounts::default(),
            start_version,
            finish_version: start_version,
            library_version: None,
            store_writes: 0,
            elapsed: Duration::ZERO,
            errors: Vec::new(),
            warnings: Vec::new(),
            cancelled: false,
        }
    }

    /// No item errors and the run was not cancelled
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }

    /// Whether any file was created, changed or removed
    pub fn has_changes(&self) -> bool {
        self.created + self.updated + self.removed > 0
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}

fn as_millis<S: serde::Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(elapsed.as_millis() as u64)
}
