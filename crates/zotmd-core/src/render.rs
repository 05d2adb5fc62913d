//! Rendering of the generated markdown body
//!
//! A [`Renderer`] turns an item and its merged annotations into the body of
//! the machine region. Frontmatter is produced separately by
//! [`document::frontmatter`](crate::document::frontmatter) so annotation-only
//! updates can keep it byte-identical.

use thiserror::Error;

use crate::annotations::MergedAnnotation;
use crate::hashing::fingerprint_text;
use crate::models::{AnnotationKind, RemoteItem};

/// Errors from rendering an item
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("item '{0}' has no citation key")]
    MissingCitationKey(String),

    #[error("failed to render item '{item_key}': {message}")]
    Failed { item_key: String, message: String },
}

/// Everything a renderer may look at
#[derive(Debug, Clone, Copy)]
pub struct ItemContext<'a> {
    pub item: &'a RemoteItem,
    /// Annotations in render order
    pub annotations: &'a [MergedAnnotation],
    /// First PDF attachment, for `zotero://open-pdf` links
    pub pdf_attachment_key: Option<&'a str>,
}

impl<'a> ItemContext<'a> {
    pub fn new(item: &'a RemoteItem, annotations: &'a [MergedAnnotation]) -> Self {
        Self {
            item,
            annotations,
            pdf_attachment_key: item.pdf_attachment_key(),
        }
    }
}

/// Turns an item context into markdown
///
/// Implementations must be pure: equal contexts render to equal bytes.
pub trait Renderer: Send + Sync {
    fn render(&self, ctx: &ItemContext<'_>) -> Result<String, RenderError>;

    /// Identity of the layout; a change triggers re-rendering every item
    fn fingerprint(&self) -> String;

    /// Initial user region for newly created files
    fn user_region_seed(&self) -> String {
        "\n## Notes\n\n".to_string()
    }
}

const LAYOUT_VERSION: &str = "zotmd-markdown-layout-v1";

/// The built-in fixed layout
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl Renderer for MarkdownRenderer {
    fn render(&self, ctx: &ItemContext<'_>) -> Result<String, RenderError> {
        let item = ctx.item;
        if !item.is_eligible() {
            return Err(RenderError::MissingCitationKey(item.key.clone()));
        }

        let metadata = &item.metadata;
        let mut out = String::new();

        let title = if metadata.title.trim().is_empty() {
            item.citation_key.as_deref().unwrap_or(&item.key)
        } else {
            metadata.title.trim()
        };
        out.push_str(&format!("# {}\n\n", title));

        if !metadata.authors.is_empty() {
            out.push_str(&format!("**Authors:** {}\n", metadata.authors.join("; ")));
        }
        if let Some(year) = metadata.year.as_deref() {
            out.push_str(&format!("**Year:** {}\n", year));
        }
        if let Some(publication) = metadata.publication.as_deref() {
            out.push_str(&format!("**Publication:** {}\n", publication));
        }
        if let Some(doi) = metadata.doi.as_deref() {
            out.push_str(&format!("**DOI:** [{0}](https://doi.org/{0})\n", doi));
        }

        out.push_str(&format!(
            "\n[Open in Zotero](zotero://select/library/items/{})",
            item.key
        ));
        if let Some(pdf) = ctx.pdf_attachment_key {
            out.push_str(&format!(
                " | [Open PDF](zotero://open-pdf/library/items/{})",
                pdf
            ));
        }
        out.push('\n');

        if let Some(abstract_note) = metadata
            .abstract_note
            .as_deref()
            .filter(|a| !a.trim().is_empty())
        {
            out.push_str("\n## Abstract\n\n");
            out.push_str(abstract_note.trim());
            out.push('\n');
        }

        out.push_str("\n## Annotations\n\n");
        if ctx.annotations.is_empty() {
            out.push_str("_No annotations._\n");
        }
        for merged in ctx.annotations {
            render_annotation(&mut out, merged);
        }

        Ok(out)
    }

    fn fingerprint(&self) -> String {
        fingerprint_text(LAYOUT_VERSION)
    }
}

fn render_annotation(out: &mut String, merged: &MergedAnnotation) {
    let a = &merged.annotation;

    match a.kind {
        AnnotationKind::Highlight | AnnotationKind::Underline | AnnotationKind::Text => {
            for line in a.text.lines() {
                out.push_str("> ");
                out.push_str(line);
                out.push('\n');
            }
            if a.text.is_empty() {
                out.push_str(">\n");
            }
        }
        AnnotationKind::Image | AnnotationKind::Ink => {
            out.push_str(&format!("_[{} annotation]_\n", a.kind));
        }
        AnnotationKind::Note | AnnotationKind::Comment => {
            out.push_str(a.text.trim_end());
            out.push('\n');
        }
    }

    if let Some(comment) = a.comment.as_deref().filter(|c| !c.trim().is_empty()) {
        out.push('\n');
        out.push_str(comment.trim_end());
        out.push('\n');
    }

    let page = a.page_label.as_deref().unwrap_or("?");
    out.push_str(&format!(
        "\n[Page {}](zotero://open-pdf/library/items/{}?page={}&annotation={})",
        page, a.attachment_key, page, a.key
    ));
    if let Some(color) = a.color.as_deref() {
        out.push_str(&format!(" `{}`", color));
    }
    out.push_str("\n\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::ChangeKind;
    use crate::models::{Attachment, RemoteAnnotation};
    use chrono::Utc;

    fn item() -> RemoteItem {
        let mut item = RemoteItem::new("ABCD1234", Some("smith2020"), 4);
        item.metadata.title = "On Sync".to_string();
        item.metadata.authors = vec!["Smith, Jane".to_string(), "Doe, John".to_string()];
        item.metadata.year = Some("2020".to_string());
        item.attachments.push(Attachment {
            key: "PDF1".to_string(),
            content_type: Some("application/pdf".to_string()),
            filename: None,
        });
        item
    }

    fn highlight(key: &str, text: &str) -> MergedAnnotation {
        MergedAnnotation {
            annotation: RemoteAnnotation {
                key: key.to_string(),
                attachment_key: "PDF1".to_string(),
                kind: AnnotationKind::Highlight,
                sort_index: "00001".to_string(),
                page_label: Some("3".to_string()),
                position: None,
                text: text.to_string(),
                comment: Some("worth citing".to_string()),
                color: Some("#ffd400".to_string()),
                date_modified: Utc::now(),
            },
            change: ChangeKind::Added,
        }
    }

    #[test]
    fn test_render_item_with_annotations() {
        let item = item();
        let annotations = vec![highlight("ANN1", "line one\nline two")];
        let body = MarkdownRenderer::new()
            .render(&ItemContext::new(&item, &annotations))
            .unwrap();

        assert!(body.starts_with("# On Sync\n\n"));
        assert!(body.contains("**Authors:** Smith, Jane; Doe, John\n"));
        assert!(body.contains("[Open PDF](zotero://open-pdf/library/items/PDF1)"));
        assert!(body.contains("> line one\n> line two\n"));
        assert!(body.contains("worth citing"));
        assert!(body.contains("?page=3&annotation=ANN1"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let item = item();
        let annotations = vec![highlight("ANN1", "text")];
        let renderer = MarkdownRenderer::new();
        let ctx = ItemContext::new(&item, &annotations);

        assert_eq!(renderer.render(&ctx).unwrap(), renderer.render(&ctx).unwrap());
    }

    #[test]
    fn test_render_without_annotations() {
        let item = item();
        let body = MarkdownRenderer::new()
            .render(&ItemContext::new(&item, &[]))
            .unwrap();
        assert!(body.contains("_No annotations._"));
    }

    #[test]
    fn test_render_requires_citation_key() {
        let item = RemoteItem::new("NOKEY", None, 1);
        let err = MarkdownRenderer::new()
            .render(&ItemContext::new(&item, &[]))
            .unwrap_err();
        assert_eq!(err, RenderError::MissingCitationKey("NOKEY".to_string()));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(
            MarkdownRenderer::new().fingerprint(),
            MarkdownRenderer.fingerprint()
        );
    }
}
