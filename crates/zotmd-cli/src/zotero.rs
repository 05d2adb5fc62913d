//! Zotero Web API client
//!
//! Blocking client for API v3. Every request passes through a `governor`
//! rate limiter. During a full listing the annotations of every attachment
//! arrive with the items and are cached, so the engine's per-attachment
//! lookups cost no extra requests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use zotmd_core::{
    Attachment, Config, ItemMetadata, RemoteAnnotation, RemoteError, RemoteItem, RemoteLibrary,
};

const API_BASE: &str = "https://api.zotero.org";

/// Items per page, the API maximum
const PAGE_SIZE: usize = 100;

/// Keys per `itemKey` filter, the API maximum
const KEY_BATCH: usize = 50;

/// Request timeout in seconds
const REQUEST_TIMEOUT: u64 = 30;

/// Fields mapped explicitly or meaningless for rendering
const KNOWN_FIELDS: &[&str] = &[
    "key",
    "version",
    "itemType",
    "title",
    "creators",
    "date",
    "tags",
    "DOI",
    "url",
    "publicationTitle",
    "bookTitle",
    "abstractNote",
    "extra",
    "citationKey",
    "deleted",
    "parentItem",
    "collections",
    "relations",
    "dateAdded",
    "dateModified",
    "accessDate",
];

/// Request throttle over a fixed quota
pub struct RateLimiter {
    limiter: governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    clock: DefaultClock,
}

impl RateLimiter {
    /// Allow `safety_margin` of `limit` requests per `window`
    pub fn new(limit: u32, window: Duration, safety_margin: f64) -> Self {
        let allowed = ((limit as f64) * safety_margin).floor().max(1.0) as u32;
        let allowed = NonZeroU32::new(allowed).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / allowed.get())
            .map(|quota| quota.allow_burst(allowed))
            .unwrap_or_else(|| Quota::per_minute(allowed));

        let clock = DefaultClock::default();
        Self {
            limiter: governor::RateLimiter::direct_with_clock(quota, &clock),
            clock,
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60), 0.8)
    }

    /// Block until a request may go out
    pub fn acquire(&self) {
        while let Err(wait) = self.try_acquire() {
            tracing::debug!("Rate limit reached, waiting {} ms", wait.as_millis());
            thread::sleep(wait);
        }
    }

    /// Take a slot now, or report how long until one frees up
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

// ==================== Wire types ====================

#[derive(Debug, Deserialize)]
struct ApiObject {
    key: String,
    version: i64,
    data: ItemData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ItemData {
    item_type: String,
    title: String,
    creators: Vec<Creator>,
    date: String,
    tags: Vec<TagRef>,
    #[serde(rename = "DOI")]
    doi: String,
    url: String,
    publication_title: String,
    book_title: String,
    abstract_note: String,
    extra: String,
    citation_key: String,
    deleted: Option<Value>,
    parent_item: Option<String>,
    content_type: Option<String>,
    filename: Option<String>,
    annotation_type: Option<String>,
    annotation_text: Option<String>,
    annotation_comment: Option<String>,
    annotation_color: Option<String>,
    annotation_page_label: Option<String>,
    annotation_sort_index: Option<String>,
    annotation_position: Option<Value>,
    date_modified: Option<String>,
    #[serde(flatten)]
    rest: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Creator {
    creator_type: String,
    first_name: String,
    last_name: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct TagRef {
    tag: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeletedObjects {
    items: Vec<String>,
}

impl ItemData {
    fn is_trashed(&self) -> bool {
        match &self.deleted {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
            Some(Value::String(s)) => s == "1" || s == "true",
            _ => false,
        }
    }

    fn parent(&self) -> Option<&str> {
        self.parent_item.as_deref().filter(|p| !p.is_empty())
    }
}

// ==================== Conversion ====================

/// Citation key from the native field, else a Better BibTeX line in `extra`
fn citation_key(data: &ItemData) -> Option<String> {
    let native = data.citation_key.trim();
    if !native.is_empty() {
        return Some(native.to_string());
    }

    data.extra.lines().find_map(|line| {
        let (label, value) = line.split_once(':')?;
        if !label.trim().eq_ignore_ascii_case("citation key") {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// First four-digit run in a free-form date
fn year_of(date: &str) -> Option<String> {
    let bytes = date.as_bytes();
    bytes
        .windows(4)
        .enumerate()
        .find(|(i, w)| {
            w.iter().all(u8::is_ascii_digit)
                && !(*i > 0 && bytes[i - 1].is_ascii_digit())
                && !bytes.get(i + 4).is_some_and(u8::is_ascii_digit)
        })
        .map(|(i, _)| date[i..i + 4].to_string())
}

fn authors(creators: &[Creator]) -> Vec<String> {
    let has_authors = creators.iter().any(|c| c.creator_type == "author");
    creators
        .iter()
        .filter(|c| !has_authors || c.creator_type == "author")
        .filter_map(|c| {
            if !c.name.trim().is_empty() {
                return Some(c.name.trim().to_string());
            }
            match (c.last_name.trim(), c.first_name.trim()) {
                ("", "") => None,
                (last, "") => Some(last.to_string()),
                ("", first) => Some(first.to_string()),
                (last, first) => Some(format!("{}, {}", last, first)),
            }
        })
        .collect()
}

fn to_item(object: &ApiObject, attachments: Vec<Attachment>) -> RemoteItem {
    let data = &object.data;

    let extra_fields = data
        .rest
        .iter()
        .filter(|(name, _)| !KNOWN_FIELDS.contains(&name.as_str()))
        .filter_map(|(name, value)| match value {
            Value::String(s) if !s.trim().is_empty() => Some((name.clone(), s.trim().to_string())),
            _ => None,
        })
        .collect();

    let publication = non_empty(&data.publication_title).or_else(|| non_empty(&data.book_title));

    RemoteItem {
        key: object.key.clone(),
        citation_key: citation_key(data),
        version: object.version,
        metadata: ItemMetadata {
            item_type: data.item_type.clone(),
            title: data.title.trim().to_string(),
            authors: authors(&data.creators),
            date: non_empty(&data.date),
            year: year_of(&data.date),
            tags: data.tags.iter().map(|t| t.tag.clone()).collect(),
            doi: non_empty(&data.doi),
            url: non_empty(&data.url),
            publication,
            abstract_note: non_empty(&data.abstract_note),
            extra_fields,
        },
        attachments,
        trashed: data.is_trashed(),
    }
}

fn to_attachment(object: &ApiObject) -> Attachment {
    Attachment {
        key: object.key.clone(),
        content_type: object.data.content_type.clone().filter(|c| !c.is_empty()),
        filename: object.data.filename.clone().filter(|f| !f.is_empty()),
    }
}

fn to_annotation(object: &ApiObject) -> Option<RemoteAnnotation> {
    let data = &object.data;
    let attachment_key = data.parent()?.to_string();
    let kind = match data.annotation_type.as_deref()?.parse() {
        Ok(kind) => kind,
        Err(e) => {
            tracing::debug!("Skipping annotation {}: {}", object.key, e);
            return None;
        }
    };

    let date_modified = data
        .date_modified
        .as_deref()
        .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default();

    Some(RemoteAnnotation {
        key: object.key.clone(),
        attachment_key,
        kind,
        sort_index: data.annotation_sort_index.clone().unwrap_or_default(),
        page_label: data.annotation_page_label.clone().filter(|p| !p.is_empty()),
        position: data.annotation_position.as_ref().map(|p| match p {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        text: data.annotation_text.clone().unwrap_or_default(),
        comment: data.annotation_comment.clone().filter(|c| !c.is_empty()),
        color: data.annotation_color.clone().filter(|c| !c.is_empty()),
        date_modified,
    })
}

fn is_regular(data: &ItemData) -> bool {
    !matches!(data.item_type.as_str(), "attachment" | "note" | "annotation")
        && data.parent().is_none()
}

/// Items and annotations assembled from a flat object listing
#[derive(Debug, Default)]
struct Assembled {
    items: Vec<RemoteItem>,
    annotations: HashMap<String, Vec<RemoteAnnotation>>,
}

fn assemble(objects: &[ApiObject]) -> Assembled {
    let mut attachments: HashMap<&str, Vec<Attachment>> = HashMap::new();
    let mut annotations: HashMap<String, Vec<RemoteAnnotation>> = HashMap::new();

    for object in objects {
        match object.data.item_type.as_str() {
            "attachment" => {
                if let Some(parent) = object.data.parent() {
                    attachments.entry(parent).or_default().push(to_attachment(object));
                }
            }
            "annotation" => {
                if let Some(annotation) = to_annotation(object) {
                    annotations
                        .entry(annotation.attachment_key.clone())
                        .or_default()
                        .push(annotation);
                }
            }
            _ => {}
        }
    }

    let items = objects
        .iter()
        .filter(|o| is_regular(&o.data))
        .map(|o| {
            let mut found = attachments.remove(o.key.as_str()).unwrap_or_default();
            found.sort_by(|a, b| a.key.cmp(&b.key));
            to_item(o, found)
        })
        .collect();

    Assembled { items, annotations }
}

// ==================== Errors ====================

fn status_error(status: StatusCode, what: &str) -> Option<RemoteError> {
    if status.is_success() {
        return None;
    }
    let message = format!("{} returned {}", what, status);
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::Transient(message),
        s if s.is_server_error() => RemoteError::Transient(message),
        _ => RemoteError::Invalid(message),
    })
}

fn transport_error(err: reqwest::Error, what: &str) -> RemoteError {
    if err.is_decode() {
        RemoteError::Invalid(format!("{}: {}", what, err))
    } else {
        RemoteError::Transient(format!("{}: {}", what, err))
    }
}

fn header_i64(response: &Response, name: &str) -> Option<i64> {
    response
        .headers()
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

// ==================== Client ====================

/// Read-only client for one Zotero library
pub struct ZoteroClient {
    http: Client,
    base_url: String,
    api_key: String,
    limiter: RateLimiter,
    annotation_cache: Mutex<Option<HashMap<String, Vec<RemoteAnnotation>>>>,
}

impl ZoteroClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT))
            .user_agent(concat!("zotmd/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: format!(
                "{}/{}/{}",
                API_BASE,
                config.library_type.url_segment(),
                config.library_id.trim()
            ),
            api_key: config.api_key.trim().to_string(),
            limiter: RateLimiter::per_minute(config.requests_per_minute),
            annotation_cache: Mutex::new(None),
        })
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response, RemoteError> {
        self.limiter.acquire();

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("GET {} {:?}", url, query);

        let response = self
            .http
            .get(&url)
            .header("Zotero-API-Key", &self.api_key)
            .header("Zotero-API-Version", "3")
            .query(query)
            .send()
            .map_err(|e| transport_error(e, path))?;

        match status_error(response.status(), path) {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, RemoteError> {
        self.get(path, query)?
            .json()
            .map_err(|e| transport_error(e, path))
    }

    /// Every object of a listing, following pagination
    fn get_all(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<ApiObject>, RemoteError> {
        let mut objects = Vec::new();

        loop {
            let mut page_query = query.to_vec();
            page_query.push(("start", objects.len().to_string()));
            page_query.push(("limit", PAGE_SIZE.to_string()));

            let response = self.get(path, &page_query)?;
            let total = header_i64(&response, "Total-Results");
            let page: Vec<ApiObject> = response.json().map_err(|e| transport_error(e, path))?;

            let count = page.len();
            objects.extend(page);

            let done = count < PAGE_SIZE || total.is_some_and(|t| objects.len() as i64 >= t);
            if done {
                return Ok(objects);
            }
        }
    }

    /// Objects by key, in batches the API accepts
    fn get_by_keys(&self, keys: &BTreeSet<String>) -> Result<Vec<ApiObject>, RemoteError> {
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let mut objects = Vec::with_capacity(keys.len());
        for batch in keys.chunks(KEY_BATCH) {
            let query = [
                ("itemKey", batch.join(",")),
                ("includeTrashed", "1".to_string()),
            ];
            objects.extend(self.get_all("/items", &query)?);
        }
        Ok(objects)
    }

    fn set_cache(&self, cache: Option<HashMap<String, Vec<RemoteAnnotation>>>) {
        *self
            .annotation_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = cache;
    }
}

impl RemoteLibrary for ZoteroClient {
    fn current_version(&self) -> Result<i64, RemoteError> {
        let query = [("limit", "1".to_string()), ("format", "keys".to_string())];
        let response = self.get("/items/top", &query)?;
        header_i64(&response, "Last-Modified-Version").ok_or_else(|| {
            RemoteError::Invalid("response is missing Last-Modified-Version".to_string())
        })
    }

    fn items_changed_since(&self, version: i64) -> Result<Vec<RemoteItem>, RemoteError> {
        self.set_cache(None);

        let query = [
            ("since", version.to_string()),
            ("includeTrashed", "1".to_string()),
        ];
        let changed = self.get_all("/items", &query)?;

        // Changed attachments and annotations mark their top-level item changed
        let by_key: HashMap<&str, &ApiObject> =
            changed.iter().map(|o| (o.key.as_str(), o)).collect();
        let mut top: BTreeSet<String> = BTreeSet::new();
        let mut unresolved: BTreeSet<String> = BTreeSet::new();

        for object in &changed {
            let data = &object.data;
            match (data.item_type.as_str(), data.parent()) {
                ("annotation", Some(attachment)) => {
                    match by_key.get(attachment).and_then(|a| a.data.parent()) {
                        Some(parent) => {
                            top.insert(parent.to_string());
                        }
                        None => {
                            unresolved.insert(attachment.to_string());
                        }
                    }
                }
                (_, Some(parent)) => {
                    top.insert(parent.to_string());
                }
                (_, None) if is_regular(data) => {
                    top.insert(object.key.clone());
                }
                _ => {}
            }
        }

        for attachment in self.get_by_keys(&unresolved)? {
            if let Some(parent) = attachment.data.parent() {
                top.insert(parent.to_string());
            }
        }

        let mut items = Vec::with_capacity(top.len());
        for object in self.get_by_keys(&top)? {
            if !is_regular(&object.data) {
                continue;
            }
            let children = self.get_all(
                &format!("/items/{}/children", object.key),
                &[("itemType", "attachment".to_string())],
            )?;
            let mut attachments: Vec<Attachment> = children.iter().map(to_attachment).collect();
            attachments.sort_by(|a, b| a.key.cmp(&b.key));
            items.push(to_item(&object, attachments));
        }

        tracing::debug!(
            "{} objects changed since {}, {} top-level items affected",
            changed.len(),
            version,
            items.len()
        );
        Ok(items)
    }

    fn all_items(&self) -> Result<Vec<RemoteItem>, RemoteError> {
        let objects = self.get_all("/items", &[("includeTrashed", "1".to_string())])?;
        let assembled = assemble(&objects);
        tracing::debug!(
            "Listed {} objects: {} items, annotations on {} attachments",
            objects.len(),
            assembled.items.len(),
            assembled.annotations.len()
        );
        self.set_cache(Some(assembled.annotations));
        Ok(assembled.items)
    }

    fn annotations_for(&self, attachment_key: &str) -> Result<Vec<RemoteAnnotation>, RemoteError> {
        {
            let cache = self
                .annotation_cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(cache) = cache.as_ref() {
                return Ok(cache.get(attachment_key).cloned().unwrap_or_default());
            }
        }

        let children = self.get_all(
            &format!("/items/{}/children", attachment_key),
            &[("itemType", "annotation".to_string())],
        )?;
        Ok(children.iter().filter_map(to_annotation).collect())
    }

    fn deleted_item_keys(&self, version: i64) -> Result<Vec<String>, RemoteError> {
        let deleted: DeletedObjects =
            self.get_json("/deleted", &[("since", version.to_string())])?;
        Ok(deleted.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zotmd_core::AnnotationKind;

    fn objects(json: &str) -> Vec<ApiObject> {
        serde_json::from_str(json).unwrap()
    }

    const LISTING: &str = r##"[
        {
            "key": "ITEM1",
            "version": 12,
            "data": {
                "key": "ITEM1",
                "itemType": "journalArticle",
                "title": " On Sync ",
                "creators": [
                    {"creatorType": "author", "firstName": "Jane", "lastName": "Smith"},
                    {"creatorType": "editor", "firstName": "Ed", "lastName": "Itor"},
                    {"creatorType": "author", "name": "The Collective"}
                ],
                "date": "March 2020",
                "tags": [{"tag": "sync"}, {"tag": "files", "type": 1}],
                "DOI": "10.1000/xyz",
                "publicationTitle": "Journal of Things",
                "extra": "Some note\nCitation Key: smith2020sync",
                "volume": "7",
                "collections": ["C1"],
                "dateModified": "2024-01-01T00:00:00Z"
            }
        },
        {
            "key": "PDF1",
            "version": 10,
            "data": {
                "itemType": "attachment",
                "parentItem": "ITEM1",
                "contentType": "application/pdf",
                "filename": "smith.pdf"
            }
        },
        {
            "key": "ANN1",
            "version": 11,
            "data": {
                "itemType": "annotation",
                "parentItem": "PDF1",
                "annotationType": "highlight",
                "annotationText": "important",
                "annotationComment": "",
                "annotationColor": "#ffd400",
                "annotationPageLabel": "3",
                "annotationSortIndex": "00002|000100|00200",
                "annotationPosition": "{\"pageIndex\":2}",
                "dateModified": "2024-02-01T10:00:00Z"
            }
        },
        {
            "key": "ANN2",
            "version": 11,
            "data": {
                "itemType": "annotation",
                "parentItem": "PDF1",
                "annotationType": "squiggle"
            }
        },
        {
            "key": "NOTE1",
            "version": 9,
            "data": {"itemType": "note", "parentItem": "ITEM1", "note": "<p>hi</p>"}
        },
        {
            "key": "ITEM2",
            "version": 8,
            "data": {
                "itemType": "book",
                "title": "Trashed Book",
                "citationKey": "doe2019",
                "deleted": 1
            }
        }
    ]"##;

    #[test]
    fn test_assemble_listing() {
        let assembled = assemble(&objects(LISTING));

        assert_eq!(assembled.items.len(), 2);
        let item = &assembled.items[0];
        assert_eq!(item.key, "ITEM1");
        assert_eq!(item.version, 12);
        assert_eq!(item.citation_key(), Some("smith2020sync"));
        assert_eq!(item.metadata.title, "On Sync");
        assert_eq!(item.metadata.authors, vec!["Smith, Jane", "The Collective"]);
        assert_eq!(item.metadata.year.as_deref(), Some("2020"));
        assert_eq!(item.metadata.tags, vec!["sync", "files"]);
        assert_eq!(item.metadata.publication.as_deref(), Some("Journal of Things"));
        assert_eq!(item.metadata.extra_fields.get("volume").map(String::as_str), Some("7"));
        assert!(!item.metadata.extra_fields.contains_key("dateModified"));
        assert_eq!(item.pdf_attachment_key(), Some("PDF1"));
        assert!(item.is_eligible());

        let trashed = &assembled.items[1];
        assert_eq!(trashed.citation_key(), Some("doe2019"));
        assert!(trashed.trashed);
        assert!(!trashed.is_eligible());

        // Unknown annotation types are dropped
        let annotations = &assembled.annotations["PDF1"];
        assert_eq!(annotations.len(), 1);
        let annotation = &annotations[0];
        assert_eq!(annotation.kind, AnnotationKind::Highlight);
        assert_eq!(annotation.text, "important");
        assert_eq!(annotation.comment, None);
        assert_eq!(annotation.page_label.as_deref(), Some("3"));
        assert_eq!(annotation.position.as_deref(), Some("{\"pageIndex\":2}"));
        assert_eq!(annotation.date_modified.to_rfc3339(), "2024-02-01T10:00:00+00:00");
    }

    #[test]
    fn test_citation_key_sources() {
        let data = |citation_key: &str, extra: &str| ItemData {
            citation_key: citation_key.to_string(),
            extra: extra.to_string(),
            ..ItemData::default()
        };

        assert_eq!(citation_key(&data("native", "Citation Key: bbt")), Some("native".to_string()));
        assert_eq!(citation_key(&data("", "citation key:  bbt2020 ")), Some("bbt2020".to_string()));
        assert_eq!(citation_key(&data("  ", "Citation Key:")), None);
        assert_eq!(citation_key(&data("", "tex.key: other")), None);
    }

    #[test]
    fn test_year_of() {
        assert_eq!(year_of("2020-03-01").as_deref(), Some("2020"));
        assert_eq!(year_of("March 1999").as_deref(), Some("1999"));
        assert_eq!(year_of("vol 12345"), None);
        assert_eq!(year_of(""), None);
    }

    #[test]
    fn test_status_classification() {
        assert!(status_error(StatusCode::OK, "/items").is_none());
        assert!(matches!(status_error(StatusCode::FORBIDDEN, "/items"), Some(RemoteError::Auth(_))));
        assert!(matches!(status_error(StatusCode::UNAUTHORIZED, "/items"), Some(RemoteError::Auth(_))));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "/items"),
            Some(RemoteError::Transient(_))
        ));
        assert!(matches!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, "/items"),
            Some(RemoteError::Transient(_))
        ));
        assert!(matches!(status_error(StatusCode::NOT_FOUND, "/items"), Some(RemoteError::Invalid(_))));
    }

    #[test]
    fn test_deleted_objects() {
        let deleted: DeletedObjects =
            serde_json::from_str(r#"{"collections": [], "items": ["A", "B"], "tags": []}"#).unwrap();
        assert_eq!(deleted.items, vec!["A", "B"]);
    }

    #[test]
    fn test_rate_limiter_quota() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60), 0.5);

        for _ in 0..5 {
            assert_eq!(limiter.try_acquire(), Ok(()));
        }

        // One slot frees up every 12s
        let wait = limiter.try_acquire().unwrap_err();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(12));
    }

    #[test]
    fn test_rate_limiter_per_minute_keeps_margin() {
        let limiter = RateLimiter::per_minute(120);
        for _ in 0..96 {
            assert!(limiter.try_acquire().is_ok());
        }
        assert!(limiter.try_acquire().is_err());
    }

    #[test]
    fn test_rate_limiter_allows_at_least_one() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1), 0.1);
        assert_eq!(limiter.try_acquire(), Ok(()));
        assert!(limiter.try_acquire().is_err());
    }
}
