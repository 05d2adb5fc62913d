//! Content fingerprints
//!
//! Fingerprints are SHA-256 digests over canonical JSON (sorted object keys,
//! no insignificant whitespace). They are the only signal used to decide
//! whether an item's file needs rewriting, so logically equal inputs must
//! always hash equally.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::models::{ItemMetadata, RemoteAnnotation};

const PREFIX: &str = "sha256:";

/// Fingerprint of an item's citation key, metadata and linked PDF
///
/// Covers every item-level input of the rendered file. Tags are treated as
/// a set; author order is significant.
pub fn fingerprint_metadata(
    citation_key: &str,
    metadata: &ItemMetadata,
    pdf_attachment_key: Option<&str>,
) -> String {
    let mut tags: Vec<&str> = metadata.tags.iter().map(|t| t.trim()).collect();
    tags.sort_unstable();
    tags.dedup();

    let value = json!({
        "citation_key": citation_key,
        "item_type": metadata.item_type,
        "title": metadata.title,
        "authors": metadata.authors,
        "date": metadata.date,
        "year": metadata.year,
        "tags": tags,
        "doi": metadata.doi,
        "url": metadata.url,
        "publication": metadata.publication,
        "abstract_note": metadata.abstract_note,
        "extra_fields": metadata.extra_fields,
        "pdf_attachment": pdf_attachment_key,
    });
    hash_value(&value)
}

/// Fingerprint of an annotation set, independent of input order
///
/// Modification timestamps are excluded; only rendered content counts.
/// Duplicate keys collapse to their first occurrence.
pub fn fingerprint_annotations(annotations: &[RemoteAnnotation]) -> String {
    let mut sorted: Vec<&RemoteAnnotation> = Vec::with_capacity(annotations.len());
    for annotation in annotations {
        if !sorted.iter().any(|a| a.key == annotation.key) {
            sorted.push(annotation);
        }
    }
    sorted.sort_by(|a, b| a.key.cmp(&b.key));

    let entries: Vec<Value> = sorted
        .into_iter()
        .map(|a| {
            json!({
                "key": a.key,
                "attachment_key": a.attachment_key,
                "kind": a.kind.as_str(),
                "sort_index": a.sort_index,
                "page_label": a.page_label,
                "position": a.position,
                "text": a.text,
                "comment": a.comment,
                "color": a.color,
            })
        })
        .collect();
    hash_value(&Value::Array(entries))
}

/// Fingerprint of arbitrary text (templates, file contents)
pub fn fingerprint_text(text: &str) -> String {
    digest(text.as_bytes())
}

fn hash_value(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    digest(out.as_bytes())
}

fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{}{:x}", PREFIX, hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        // Serializing a str cannot fail
        Value::String(s) => out.push_str(&Value::String(s.clone()).to_string()),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnnotationKind;
    use chrono::{TimeZone, Utc};

    fn metadata() -> ItemMetadata {
        let mut metadata = ItemMetadata {
            item_type: "journalArticle".to_string(),
            title: "On Sync".to_string(),
            authors: vec!["Smith, Jane".to_string(), "Doe, John".to_string()],
            year: Some("2020".to_string()),
            tags: vec!["sync".to_string(), "databases".to_string()],
            doi: Some("10.1000/xyz".to_string()),
            ..Default::default()
        };
        metadata
            .extra_fields
            .insert("volume".to_string(), "12".to_string());
        metadata
            .extra_fields
            .insert("issue".to_string(), "3".to_string());
        metadata
    }

    fn annotation(key: &str, text: &str, minute: u32) -> RemoteAnnotation {
        RemoteAnnotation {
            key: key.to_string(),
            attachment_key: "ATT1".to_string(),
            kind: AnnotationKind::Highlight,
            sort_index: format!("00001|{:06}|00000", minute),
            page_label: Some("1".to_string()),
            position: Some(r#"{"pageIndex":0}"#.to_string()),
            text: text.to_string(),
            comment: None,
            color: Some("#ffd400".to_string()),
            date_modified: Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, 0).unwrap(),
        }
    }

    #[test]
    fn test_metadata_fingerprint_is_stable() {
        let a = fingerprint_metadata("smith2020", &metadata(), None);
        let b = fingerprint_metadata("smith2020", &metadata(), None);
        assert_eq!(a, b);
        assert!(a.starts_with("sha256:"));
        assert_eq!(a.len(), PREFIX.len() + 64);
    }

    #[test]
    fn test_metadata_fingerprint_ignores_tag_and_field_order() {
        let base = metadata();

        let mut permuted = metadata();
        permuted.tags.reverse();
        permuted.extra_fields.clear();
        permuted
            .extra_fields
            .insert("issue".to_string(), "3".to_string());
        permuted
            .extra_fields
            .insert("volume".to_string(), "12".to_string());

        assert_eq!(
            fingerprint_metadata("smith2020", &base, None),
            fingerprint_metadata("smith2020", &permuted, None)
        );
    }

    #[test]
    fn test_metadata_fingerprint_detects_changes() {
        let base = fingerprint_metadata("smith2020", &metadata(), None);

        let mut retitled = metadata();
        retitled.title = "On Async".to_string();
        assert_ne!(base, fingerprint_metadata("smith2020", &retitled, None));

        let mut reordered_authors = metadata();
        reordered_authors.authors.reverse();
        assert_ne!(base, fingerprint_metadata("smith2020", &reordered_authors, None));

        assert_ne!(base, fingerprint_metadata("smith2021", &metadata(), None));
    }

    #[test]
    fn test_metadata_fingerprint_covers_pdf_attachment() {
        let without = fingerprint_metadata("smith2020", &metadata(), None);
        let with = fingerprint_metadata("smith2020", &metadata(), Some("PDF1"));
        assert_ne!(without, with);
        assert_ne!(with, fingerprint_metadata("smith2020", &metadata(), Some("PDF2")));
    }

    #[test]
    fn test_annotation_fingerprint_is_order_independent() {
        let forward = vec![annotation("A", "one", 1), annotation("B", "two", 2)];
        let backward = vec![annotation("B", "two", 2), annotation("A", "one", 1)];
        assert_eq!(
            fingerprint_annotations(&forward),
            fingerprint_annotations(&backward)
        );
    }

    #[test]
    fn test_annotation_fingerprint_ignores_modification_time() {
        let a = vec![annotation("A", "one", 1)];
        let mut b = a.clone();
        b[0].date_modified = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(fingerprint_annotations(&a), fingerprint_annotations(&b));

        b[0].text = "one, edited".to_string();
        assert_ne!(fingerprint_annotations(&a), fingerprint_annotations(&b));
    }

    #[test]
    fn test_empty_annotation_set() {
        assert_eq!(fingerprint_annotations(&[]), fingerprint_annotations(&[]));
        assert_ne!(
            fingerprint_annotations(&[]),
            fingerprint_annotations(&[annotation("A", "one", 1)])
        );
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let mut out = String::new();
        write_canonical(&json!({"b": 1, "a": [true, null, "x"]}), &mut out);
        assert_eq!(out, r#"{"a":[true,null,"x"],"b":1}"#);
    }
}
