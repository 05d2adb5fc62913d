//! Change detection
//!
//! Classifies each remote item against its stored record. The detector only
//! decides; it never touches the store or the filesystem.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hashing::{fingerprint_annotations, fingerprint_metadata};
use crate::models::{RemoteAnnotation, RemoteItem, SyncStateRecord};

/// Kind of sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Only items changed since the cursor
    Incremental,
    /// Every item, every file regenerated
    Full,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Incremental => write!(f, "incremental"),
            SyncMode::Full => write!(f, "full"),
        }
    }
}

/// What to do with one item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// No live record: write a new file
    Create,
    /// Fingerprints match the stored record
    Skip,
    /// Only annotations changed: regenerate the body, keep frontmatter and user region
    UpdateAnnotationsOnly,
    /// Regenerate the whole machine region
    UpdateFull,
    /// The item no longer qualifies: quarantine or delete its file
    Remove,
    /// Not eligible and never synced: nothing to do
    Ineligible,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Create => "create",
            Action::Skip => "skip",
            Action::UpdateAnnotationsOnly => "update-annotations",
            Action::UpdateFull => "update",
            Action::Remove => "remove",
            Action::Ineligible => "ineligible",
        };
        f.write_str(s)
    }
}

/// Current fingerprints of an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprints {
    pub metadata: String,
    pub annotations: String,
}

impl Fingerprints {
    pub fn compute(citation_key: &str, item: &RemoteItem, annotations: &[RemoteAnnotation]) -> Self {
        Self {
            metadata: fingerprint_metadata(
                citation_key,
                &item.metadata,
                item.pdf_attachment_key(),
            ),
            annotations: fingerprint_annotations(annotations),
        }
    }
}

/// Classify one item
///
/// `record` is the stored record for the item key, live or removed; a
/// removed record counts as absent. `current` may be omitted for items that
/// are not eligible.
pub fn classify(
    item: &RemoteItem,
    record: Option<&SyncStateRecord>,
    current: Option<&Fingerprints>,
    mode: SyncMode,
) -> Action {
    let live = record.filter(|r| r.is_live());

    if !item.is_eligible() {
        return match live {
            Some(_) => Action::Remove,
            None => Action::Ineligible,
        };
    }

    let Some(record) = live else {
        return Action::Create;
    };

    if mode == SyncMode::Full {
        return Action::UpdateFull;
    }

    let Some(current) = current else {
        return Action::UpdateFull;
    };

    let metadata_same = current.metadata == record.metadata_hash;
    let annotations_same = current.annotations == record.annotations_hash;

    match (metadata_same, annotations_same) {
        (true, true) => Action::Skip,
        (true, false) => Action::UpdateAnnotationsOnly,
        _ => Action::UpdateFull,
    }
}

/// Live records whose item is absent from the remote library
///
/// Only meaningful for a full scan, where `remote_keys` is the complete set.
pub fn removals_for_full_scan<'a>(
    live: &'a [SyncStateRecord],
    remote_keys: &HashSet<&str>,
) -> Vec<&'a SyncStateRecord> {
    live.iter()
        .filter(|r| r.is_live() && !remote_keys.contains(r.item_key.as_str()))
        .collect()
}
