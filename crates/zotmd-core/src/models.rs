//! Data models for ZotMD
//!
//! Defines the remote-side structures (items, attachments, annotations) as
//! handed over by a [`RemoteLibrary`](crate::remote::RemoteLibrary), and the
//! local bookkeeping record kept for every synced item.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A top-level library item (journal article, book, ...)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteItem {
    /// Library item key (the durable identity)
    pub key: String,
    /// Citation key assigned by a companion tool; items without one are not synced
    pub citation_key: Option<String>,
    /// Per-library modification version of the item
    pub version: i64,
    /// Bibliographic metadata
    pub metadata: ItemMetadata,
    /// Child attachments
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// The item sits in the library trash
    #[serde(default)]
    pub trashed: bool,
}

impl RemoteItem {
    /// Create an item with empty metadata
    pub fn new(key: impl Into<String>, citation_key: Option<&str>, version: i64) -> Self {
        Self {
            key: key.into(),
            citation_key: citation_key.map(str::to_string),
            version,
            metadata: ItemMetadata::default(),
            attachments: Vec::new(),
            trashed: false,
        }
    }

    /// Whether the item qualifies for sync
    pub fn is_eligible(&self) -> bool {
        !self.trashed
            && self
                .citation_key
                .as_deref()
                .is_some_and(|key| !key.trim().is_empty())
    }

    /// Trimmed citation key of an eligible item
    pub fn citation_key(&self) -> Option<&str> {
        self.citation_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Key of the first PDF attachment, used for `open-pdf` links
    pub fn pdf_attachment_key(&self) -> Option<&str> {
        self.attachments
            .iter()
            .find(|a| a.is_pdf())
            .map(|a| a.key.as_str())
    }
}

/// Bibliographic metadata of an item
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemMetadata {
    pub item_type: String,
    pub title: String,
    /// Authors in citation order, formatted "Last, First"
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub publication: Option<String>,
    #[serde(default)]
    pub abstract_note: Option<String>,
    /// Any remaining non-empty fields, keyed by field name
    #[serde(default)]
    pub extra_fields: BTreeMap<String, String>,
}

/// A file attached to an item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub key: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl Attachment {
    pub fn is_pdf(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("pdf"))
    }
}

/// Kind of an annotation made in the PDF reader
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Highlight,
    Underline,
    Note,
    Comment,
    Text,
    Image,
    Ink,
}

impl AnnotationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationKind::Highlight => "highlight",
            AnnotationKind::Underline => "underline",
            AnnotationKind::Note => "note",
            AnnotationKind::Comment => "comment",
            AnnotationKind::Text => "text",
            AnnotationKind::Image => "image",
            AnnotationKind::Ink => "ink",
        }
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnnotationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "highlight" => Ok(AnnotationKind::Highlight),
            "underline" => Ok(AnnotationKind::Underline),
            "note" => Ok(AnnotationKind::Note),
            "comment" => Ok(AnnotationKind::Comment),
            "text" => Ok(AnnotationKind::Text),
            "image" => Ok(AnnotationKind::Image),
            "ink" => Ok(AnnotationKind::Ink),
            other => Err(format!("unknown annotation type '{}'", other)),
        }
    }
}

/// An annotation on a PDF attachment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteAnnotation {
    /// Annotation identity
    pub key: String,
    /// Attachment the annotation belongs to
    pub attachment_key: String,
    pub kind: AnnotationKind,
    /// Reader sort index ("page|offset|top"), orders annotations within an attachment
    #[serde(default)]
    pub sort_index: String,
    #[serde(default)]
    pub page_label: Option<String>,
    /// Raw position JSON as reported by the reader
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    pub date_modified: DateTime<Utc>,
}

impl RemoteAnnotation {
    /// Whether two versions of the same annotation differ in rendered content
    pub fn content_differs(&self, other: &RemoteAnnotation) -> bool {
        self.kind != other.kind
            || self.text != other.text
            || self.comment != other.comment
            || self.sort_index != other.sort_index
            || self.page_label != other.page_label
            || self.position != other.position
            || self.color != other.color
            || self.attachment_key != other.attachment_key
    }
}

/// Status of a sync record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// The item is live and its file is in the output tree
    Active,
    /// The item disappeared remotely; its file was quarantined
    Removed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Removed => "removed",
        }
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RecordStatus::Active),
            "removed" => Ok(RecordStatus::Removed),
            other => Err(format!("unknown record status '{}'", other)),
        }
    }
}

/// Last-synced state of one item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncStateRecord {
    pub item_key: String,
    pub citation_key: String,
    pub metadata_hash: String,
    pub annotations_hash: String,
    /// File path relative to the output directory
    pub file_path: String,
    /// Library version at which the record was written
    pub library_version: i64,
    /// Item version at which the record was written
    pub item_version: i64,
    pub status: RecordStatus,
    /// Annotation set as rendered into the file
    pub annotations: Vec<RemoteAnnotation>,
    pub synced_at: DateTime<Utc>,
}

impl SyncStateRecord {
    pub fn is_live(&self) -> bool {
        self.status == RecordStatus::Active
    }

    /// Equality ignoring the sync timestamp
    pub fn same_state(&self, other: &SyncStateRecord) -> bool {
        self.item_key == other.item_key
            && self.citation_key == other.citation_key
            && self.metadata_hash == other.metadata_hash
            && self.annotations_hash == other.annotations_hash
            && self.file_path == other.file_path
            && self.library_version == other.library_version
            && self.item_version == other.item_version
            && self.status == other.status
            && self.annotations == other.annotations
    }
}
