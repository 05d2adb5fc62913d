//! Annotation merging
//!
//! Reconciles the annotation set extracted in this run against the set
//! stored with the item's last sync. Matching is by annotation key.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::models::RemoteAnnotation;

/// How an annotation relates to the previously synced set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Updated,
    Unchanged,
}

/// One annotation to render, tagged with its change
#[derive(Debug, Clone, PartialEq)]
pub struct MergedAnnotation {
    pub annotation: RemoteAnnotation,
    pub change: ChangeKind,
}

/// Output of [`merge`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeResult {
    /// Annotations to render, in render order
    pub annotations: Vec<MergedAnnotation>,
    /// Keys present previously but gone now, sorted
    pub removed: Vec<String>,
    /// Whether anything was added, updated or removed
    pub changed: bool,
}

impl MergeResult {
    pub fn added(&self) -> usize {
        self.count(ChangeKind::Added)
    }

    pub fn updated(&self) -> usize {
        self.count(ChangeKind::Updated)
    }

    fn count(&self, kind: ChangeKind) -> usize {
        self.annotations.iter().filter(|m| m.change == kind).count()
    }

    /// The merged set without change tags, in render order
    pub fn current(&self) -> Vec<RemoteAnnotation> {
        self.annotations
            .iter()
            .map(|m| m.annotation.clone())
            .collect()
    }
}

/// Merge the current annotation set against the previous one
///
/// Duplicate keys in `current` collapse to their first occurrence.
pub fn merge(previous: &[RemoteAnnotation], current: &[RemoteAnnotation]) -> MergeResult {
    let previous_by_key: HashMap<&str, &RemoteAnnotation> =
        previous.iter().map(|a| (a.key.as_str(), a)).collect();

    let mut seen: HashSet<&str> = HashSet::with_capacity(current.len());
    let mut annotations = Vec::with_capacity(current.len());

    for annotation in current {
        if !seen.insert(annotation.key.as_str()) {
            tracing::debug!("Ignoring duplicate annotation {}", annotation.key);
            continue;
        }

        let change = match previous_by_key.get(annotation.key.as_str()) {
            None => ChangeKind::Added,
            Some(old) if old.content_differs(annotation) => ChangeKind::Updated,
            Some(_) => ChangeKind::Unchanged,
        };

        annotations.push(MergedAnnotation {
            annotation: annotation.clone(),
            change,
        });
    }

    annotations.sort_by(|a, b| render_order(&a.annotation, &b.annotation));

    let mut removed: Vec<String> = previous
        .iter()
        .filter(|a| !seen.contains(a.key.as_str()))
        .map(|a| a.key.clone())
        .collect();
    removed.sort();
    removed.dedup();

    let changed = !removed.is_empty()
        || annotations
            .iter()
            .any(|m| m.change != ChangeKind::Unchanged);

    MergeResult {
        annotations,
        removed,
        changed,
    }
}

/// Attachment, then position in the document, then key
pub fn render_order(a: &RemoteAnnotation, b: &RemoteAnnotation) -> Ordering {
    a.attachment_key
        .cmp(&b.attachment_key)
        .then_with(|| a.sort_index.cmp(&b.sort_index))
        .then_with(|| a.key.cmp(&b.key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnnotationKind;
    use chrono::Utc;

    fn annotation(key: &str, attachment: &str, sort_index: &str, text: &str) -> RemoteAnnotation {
        RemoteAnnotation {
            key: key.to_string(),
            attachment_key: attachment.to_string(),
            kind: AnnotationKind::Highlight,
            sort_index: sort_index.to_string(),
            page_label: None,
            position: None,
            text: text.to_string(),
            comment: None,
            color: Some("#ffd400".to_string()),
            date_modified: Utc::now(),
        }
    }

    #[test]
    fn test_merge_added_updated_removed() {
        let a = annotation("A", "ATT1", "00001", "alpha");
        let b = annotation("B", "ATT1", "00002", "beta");
        let mut a_edited = a.clone();
        a_edited.text = "alpha, revised".to_string();
        let c = annotation("C", "ATT1", "00003", "gamma");

        let result = merge(&[a, b], &[a_edited.clone(), c.clone()]);

        assert_eq!(
            result.annotations,
            vec![
                MergedAnnotation {
                    annotation: a_edited,
                    change: ChangeKind::Updated
                },
                MergedAnnotation {
                    annotation: c,
                    change: ChangeKind::Added
                },
            ]
        );
        assert_eq!(result.removed, vec!["B".to_string()]);
        assert!(result.changed);
        assert_eq!(result.added(), 1);
        assert_eq!(result.updated(), 1);
    }

    #[test]
    fn test_merge_unchanged() {
        let set = vec![
            annotation("A", "ATT1", "00001", "alpha"),
            annotation("B", "ATT1", "00002", "beta"),
        ];
        let mut touched = set.clone();
        touched[0].date_modified = touched[0].date_modified + chrono::Duration::hours(1);

        let result = merge(&set, &touched);
        assert!(!result.changed);
        assert!(result.removed.is_empty());
        assert!(result
            .annotations
            .iter()
            .all(|m| m.change == ChangeKind::Unchanged));
    }

    #[test]
    fn test_merge_from_empty() {
        let result = merge(&[], &[annotation("A", "ATT1", "00001", "alpha")]);
        assert!(result.changed);
        assert_eq!(result.added(), 1);

        let result = merge(&[], &[]);
        assert!(!result.changed);
        assert!(result.annotations.is_empty());
    }

    #[test]
    fn test_merge_everything_removed() {
        let result = merge(&[annotation("A", "ATT1", "00001", "alpha")], &[]);
        assert!(result.changed);
        assert_eq!(result.removed, vec!["A".to_string()]);
        assert!(result.current().is_empty());
    }

    #[test]
    fn test_render_order() {
        let current = vec![
            annotation("Z", "ATT2", "00001", "second attachment"),
            annotation("B", "ATT1", "00005", "later on page"),
            annotation("C", "ATT1", "00001", "tie, key C"),
            annotation("A", "ATT1", "00001", "tie, key A"),
        ];

        let keys: Vec<String> = merge(&[], &current)
            .current()
            .into_iter()
            .map(|a| a.key)
            .collect();
        assert_eq!(keys, vec!["A", "C", "B", "Z"]);
    }

    #[test]
    fn test_duplicate_keys_collapse_to_first() {
        let first = annotation("A", "ATT1", "00001", "first");
        let second = annotation("A", "ATT1", "00001", "second");

        let result = merge(&[], &[first.clone(), second]);
        assert_eq!(result.current(), vec![first]);
    }
}
