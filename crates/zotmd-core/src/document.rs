//! Local file layout
//!
//! A managed file is a machine region (YAML frontmatter plus the rendered
//! body), a single marker line, and a user region:
//!
//! ```text
//! ---
//! title: "On Sync"
//! citekey: "smith2020"
//! ---
//! # On Sync
//! ...generated...
//! <!-- zotmd: user notes below this line -->
//! anything the user writes
//! ```
//!
//! The user region is never interpreted. Splitting a file and composing the
//! parts again reproduces it byte for byte.

use serde_json::Value;
use thiserror::Error;

use crate::models::RemoteItem;

/// Delimiter line between machine and user regions
pub const USER_REGION_MARKER: &str = "<!-- zotmd: user notes below this line -->";

const FRONTMATTER_FENCE: &str = "---";

/// Errors from splitting an existing file
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    #[error("file contains the user region marker {count} times; expected at most once")]
    DuplicateMarker { count: usize },
}

/// The two regions of a local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regions {
    /// Machine region, `None` when the file has no marker yet
    pub machine: Option<String>,
    /// User region, byte-exact
    pub user: String,
    // Line ending after the marker as found in the file
    marker_line_end: &'static str,
}

impl Regions {
    /// Regions of a brand new file
    pub fn new(machine: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            machine: Some(machine.into()),
            user: user.into(),
            marker_line_end: "\n",
        }
    }

    /// Whether the file was already under management
    pub fn is_managed(&self) -> bool {
        self.machine.is_some()
    }

    /// Replace the machine region, keeping the user region untouched
    pub fn with_machine(self, machine: impl Into<String>) -> Self {
        Self {
            machine: Some(machine.into()),
            ..self
        }
    }

    /// Reassemble the file text; exact inverse of [`split`]
    pub fn compose(&self) -> String {
        match &self.machine {
            None => self.user.clone(),
            Some(machine) => {
                let mut out = String::with_capacity(
                    machine.len() + USER_REGION_MARKER.len() + self.user.len() + 2,
                );
                push_machine(&mut out, machine);
                out.push_str(USER_REGION_MARKER);
                out.push_str(self.marker_line_end);
                out.push_str(&self.user);
                out
            }
        }
    }
}

/// Split file text into machine and user regions
///
/// Without a marker the whole text is the user region, so notes in a file
/// that predates management survive the first write.
pub fn split(text: &str) -> Result<Regions, SplitError> {
    let mut found: Option<(usize, usize, &'static str)> = None;
    let mut count = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let (content, line_end) = if let Some(stripped) = line.strip_suffix("\r\n") {
            (stripped, "\r\n")
        } else if let Some(stripped) = line.strip_suffix('\n') {
            (stripped, "\n")
        } else {
            (line, "")
        };

        if content == USER_REGION_MARKER {
            count += 1;
            if found.is_none() {
                found = Some((offset, offset + line.len(), line_end));
            }
        }
        offset += line.len();
    }

    if count > 1 {
        return Err(SplitError::DuplicateMarker { count });
    }

    Ok(match found {
        None => Regions {
            machine: None,
            user: text.to_string(),
            marker_line_end: "\n",
        },
        Some((start, end, line_end)) => Regions {
            machine: Some(text[..start].to_string()),
            user: text[end..].to_string(),
            // A marker at EOF without newline composes back without one
            marker_line_end: line_end,
        },
    })
}

/// Compose a file from a machine region and a user region
pub fn compose(machine: &str, user: &str) -> String {
    Regions::new(machine, user).compose()
}

fn push_machine(out: &mut String, machine: &str) {
    out.push_str(machine);
    if !machine.is_empty() && !machine.ends_with('\n') {
        out.push('\n');
    }
}

/// Build the machine region from frontmatter and rendered body
pub fn machine_region(frontmatter: &str, body: &str) -> String {
    let mut out = String::with_capacity(frontmatter.len() + body.len() + 1);
    out.push_str(frontmatter);
    out.push_str(body);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Split a machine region into its frontmatter block (fences included) and body
///
/// Returns `None` for the frontmatter when the region does not open with a
/// closed `---` block.
pub fn split_frontmatter(machine: &str) -> (Option<&str>, &str) {
    let Some(rest) = machine.strip_prefix("---\n") else {
        return (None, machine);
    };

    let mut offset = 4;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end_matches(['\r', '\n']) == FRONTMATTER_FENCE {
            return (Some(&machine[..offset]), &machine[offset..]);
        }
    }

    (None, machine)
}

/// YAML frontmatter for an item
///
/// Scalars are written as double-quoted strings. The output depends only on
/// the item, so unchanged items produce identical bytes.
pub fn frontmatter(item: &RemoteItem) -> String {
    let metadata = &item.metadata;
    let mut out = String::new();
    out.push_str(FRONTMATTER_FENCE);
    out.push('\n');

    push_scalar(&mut out, "title", Some(&metadata.title));
    push_scalar(&mut out, "citekey", item.citation_key());
    push_scalar(&mut out, "zotero_key", Some(&item.key));
    push_scalar(&mut out, "item_type", Some(&metadata.item_type));
    push_list(&mut out, "authors", metadata.authors.iter().map(String::as_str));
    push_scalar(&mut out, "year", metadata.year.as_deref());
    push_scalar(&mut out, "date", metadata.date.as_deref());
    push_scalar(&mut out, "publication", metadata.publication.as_deref());
    push_scalar(&mut out, "doi", metadata.doi.as_deref());
    push_scalar(&mut out, "url", metadata.url.as_deref());

    let mut tags: Vec<&str> = metadata.tags.iter().map(|t| t.trim()).collect();
    tags.sort_unstable();
    tags.dedup();
    push_list(&mut out, "tags", tags.into_iter());

    out.push_str(FRONTMATTER_FENCE);
    out.push('\n');
    out
}

fn push_scalar(out: &mut String, key: &str, value: Option<&str>) {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return;
    };
    out.push_str(key);
    out.push_str(": ");
    out.push_str(&quote(value));
    out.push('\n');
}

fn push_list<'a>(out: &mut String, key: &str, values: impl Iterator<Item = &'a str>) {
    let values: Vec<&str> = values.filter(|v| !v.is_empty()).collect();
    if values.is_empty() {
        return;
    }
    out.push_str(key);
    out.push_str(":\n");
    for value in values {
        out.push_str("  - ");
        out.push_str(&quote(value));
        out.push('\n');
    }
}

// JSON string syntax is valid YAML double-quoted syntax
fn quote(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}
