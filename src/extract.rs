//! Conversion of API documents into [`MediaItem`]s.
//!
//! Pure functions, no I/O. Two document shapes are accepted:
//!
//! - thread: `{"posts": [post, ...]}`
//! - catalog: `[{"page": n, "threads": [op, ...]}, ...]`, where each OP may
//!   carry a `last_replies` array
//!
//! A post yields an item when it has both `tim` and `ext` and its file was
//! not deleted. Items are numbered from 1 in post order.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::api::ApiError;
use crate::media::{MediaItem, MediaKind, MediaUrls};
use crate::target::Target;

/// Longest title derived from a comment, in characters.
const TITLE_FROM_COMMENT_CHARS: usize = 60;

static MARKUP_TAG: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"<[^>]+>"));

static WHITESPACE_RUN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\s+"));

/// One post as served by the API. Unused fields are ignored.
#[derive(Debug, Deserialize)]
struct RawPost {
    no: u64,
    filename: Option<String>,
    ext: Option<String>,
    tim: Option<u64>,
    md5: Option<String>,
    fsize: Option<u64>,
    #[serde(default)]
    filedeleted: u8,
    sub: Option<String>,
    com: Option<String>,
    #[serde(default)]
    last_replies: Vec<RawPost>,
}

#[derive(Debug, Deserialize)]
struct ThreadDocument {
    posts: Vec<RawPost>,
}

#[derive(Debug, Deserialize)]
struct CatalogPage {
    #[serde(default)]
    threads: Vec<RawPost>,
}

enum Document {
    Thread(ThreadDocument),
    Catalog(Vec<CatalogPage>),
}

fn parse(doc: &Value) -> Result<Document, ApiError> {
    match doc {
        Value::Object(map) if map.contains_key("posts") => ThreadDocument::deserialize(doc)
            .map(Document::Thread)
            .map_err(|e| ApiError::malformed(format!("thread document: {e}"))),
        Value::Array(_) => Vec::<CatalogPage>::deserialize(doc)
            .map(Document::Catalog)
            .map_err(|e| ApiError::malformed(format!("catalog document: {e}"))),
        Value::Object(_) => Err(ApiError::malformed("object without a posts array")),
        other => Err(ApiError::malformed(format!(
            "expected a thread or catalog document, got {}",
            json_type(other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Builds the media items referenced by `doc`, in post order.
///
/// # Errors
///
/// Returns [`ApiError::Malformed`] if `doc` is neither a thread nor a
/// catalog document.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use chanfetch_core::{MediaUrls, Target, extract};
///
/// let doc = serde_json::json!({"posts": [
///     {"no": 1, "tim": 1700000000000u64, "ext": ".jpg", "fsize": 1024},
///     {"no": 2},
/// ]});
/// let items = extract(&doc, &Arc::new(Target::thread("g", 1)), &MediaUrls::default()).unwrap();
/// assert_eq!(items.len(), 1);
/// assert_eq!(items[0].remote_url, "https://i.4cdn.org/g/1700000000000.jpg");
/// assert_eq!(items[0].suggested_filename, "1.jpg");
/// ```
pub fn extract(
    doc: &Value,
    target: &Arc<Target>,
    urls: &MediaUrls,
) -> Result<Vec<MediaItem>, ApiError> {
    let items = match &parse(doc)? {
        Document::Thread(thread) => {
            let items = build_items(thread.posts.iter(), target, urls);
            debug!(posts = thread.posts.len(), items = items.len(), "extracted thread media");
            items
        }
        Document::Catalog(pages) => {
            let items = build_items(catalog_posts(pages), target, urls);
            debug!(pages = pages.len(), items = items.len(), "extracted catalog media");
            items
        }
    };
    Ok(items)
}

/// Appends the items of `doc` to `items`, continuing its numbering.
///
/// Used when several thread documents are merged into one target.
///
/// # Errors
///
/// Same as [`extract`].
pub fn extract_into(
    items: &mut Vec<MediaItem>,
    doc: &Value,
    target: &Arc<Target>,
    urls: &MediaUrls,
) -> Result<usize, ApiError> {
    let offset = items.len();
    let extracted = extract(doc, target, urls)?;
    let added = extracted.len();
    items.extend(extracted.into_iter().map(|mut item| {
        item.index += offset;
        item.suggested_filename = format!("{}{}", item.index, item.extension);
        item
    }));
    Ok(added)
}

fn catalog_posts(pages: &[CatalogPage]) -> impl Iterator<Item = &RawPost> {
    pages
        .iter()
        .flat_map(|page| page.threads.iter())
        .flat_map(|op| std::iter::once(op).chain(op.last_replies.iter()))
}

fn build_items<'a>(
    posts: impl Iterator<Item = &'a RawPost>,
    target: &Arc<Target>,
    urls: &MediaUrls,
) -> Vec<MediaItem> {
    posts
        .filter_map(|post| {
            if post.filedeleted == 1 {
                debug!(post = post.no, "skipping deleted file");
                return None;
            }
            let tim = post.tim?;
            let extension = normalize_extension(post.ext.as_deref()?)?;
            Some((post, tim, extension))
        })
        .enumerate()
        .map(|(position, (post, tim, extension))| {
            let index = position + 1;
            MediaItem {
                remote_url: urls.media_url(target.board_code(), tim, &extension),
                suggested_filename: format!("{index}{extension}"),
                original_filename: post
                    .filename
                    .as_ref()
                    .map(|name| format!("{name}{extension}")),
                index,
                kind: MediaKind::from_extension(&extension),
                expected_size: post.fsize,
                upstream_digest: post.md5.clone(),
                extension,
                target: Arc::clone(target),
            }
        })
        .collect()
}

/// Lowercase extension with a leading dot; `None` if empty.
fn normalize_extension(ext: &str) -> Option<String> {
    let bare = ext.trim().trim_start_matches('.');
    if bare.is_empty() {
        return None;
    }
    Some(format!(".{}", bare.to_ascii_lowercase()))
}

/// Thread numbers listed in a catalog document, in catalog order.
///
/// Returns an empty list for anything that is not a catalog.
#[must_use]
pub fn thread_numbers(catalog: &Value) -> Vec<u64> {
    match parse(catalog) {
        Ok(Document::Catalog(pages)) => pages
            .iter()
            .flat_map(|page| page.threads.iter().map(|op| op.no))
            .collect(),
        _ => Vec::new(),
    }
}

/// Human-readable thread title for logs.
///
/// The OP subject when present, otherwise the first 60 characters of the
/// OP comment with markup removed and whitespace collapsed.
#[must_use]
pub fn thread_title(thread: &Value) -> Option<String> {
    let Ok(Document::Thread(doc)) = parse(thread) else {
        return None;
    };
    let op = doc.posts.first()?;

    if let Some(subject) = op.sub.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        return Some(subject.to_string());
    }

    let comment = op.com.as_deref()?;
    let (Ok(tags), Ok(spaces)) = (&*MARKUP_TAG, &*WHITESPACE_RUN) else {
        return None;
    };
    let text = tags.replace_all(comment, "");
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let head: String = text.chars().take(TITLE_FROM_COMMENT_CHARS).collect();
    Some(spaces.replace_all(head.trim(), " ").into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn target() -> Arc<Target> {
        Arc::new(Target::thread("g", 12_345_678))
    }

    #[test]
    fn test_extract_thread_in_post_order() {
        let doc = json!({"posts": [
            {"no": 1, "tim": 100, "ext": ".jpg", "filename": "cat", "fsize": 10, "md5": "abc=="},
            {"no": 2, "com": "text only"},
            {"no": 3, "tim": 101, "ext": ".WEBM", "fsize": 20},
            {"no": 4, "tim": 102, "ext": ".pdf"},
        ]});
        let items = extract(&doc, &target(), &MediaUrls::default()).unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].index, 1);
        assert_eq!(items[0].remote_url, "https://i.4cdn.org/g/100.jpg");
        assert_eq!(items[0].original_filename.as_deref(), Some("cat.jpg"));
        assert_eq!(items[0].expected_size, Some(10));
        assert_eq!(items[0].upstream_digest.as_deref(), Some("abc=="));
        assert_eq!(items[0].kind, MediaKind::Image);

        assert_eq!(items[1].index, 2);
        assert_eq!(items[1].extension, ".webm");
        assert_eq!(items[1].suggested_filename, "2.webm");
        assert_eq!(items[1].kind, MediaKind::Video);

        assert_eq!(items[2].kind, MediaKind::Document);
        assert_eq!(items[2].index, 3);
    }

    #[test]
    fn test_extract_ignores_fields_it_does_not_use() {
        let doc = json!([{"page": 1, "threads": [
            {"no": 9, "tim": 900, "ext": ".png", "w": 1920, "h": 1080, "tn_w": 250, "replies": 4},
        ]}]);
        let items = extract(&doc, &target(), &MediaUrls::default()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].remote_url, "https://i.4cdn.org/g/900.png");
    }

    #[test]
    fn test_extract_skips_deleted_and_incomplete_posts() {
        let doc = json!({"posts": [
            {"no": 1, "tim": 100, "ext": ".jpg", "filedeleted": 1},
            {"no": 2, "tim": 101},
            {"no": 3, "ext": ".png"},
            {"no": 4, "tim": 102, "ext": ".png"},
        ]});
        let items = extract(&doc, &target(), &MediaUrls::default()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].index, 1);
        assert_eq!(items[0].remote_url, "https://i.4cdn.org/g/102.png");
    }

    #[test]
    fn test_extract_catalog_includes_last_replies() {
        let doc = json!([
            {"page": 1, "threads": [
                {"no": 10, "tim": 1, "ext": ".jpg", "last_replies": [
                    {"no": 11, "tim": 2, "ext": ".gif"},
                    {"no": 12},
                ]},
                {"no": 20, "tim": 3, "ext": ".png"},
            ]},
            {"page": 2, "threads": [{"no": 30, "tim": 4, "ext": ".mp4"}]},
        ]);
        let catalog = Arc::new(Target::catalog("g"));
        let items = extract(&doc, &catalog, &MediaUrls::default()).unwrap();
        let urls: Vec<&str> = items.iter().map(|i| i.remote_url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://i.4cdn.org/g/1.jpg",
                "https://i.4cdn.org/g/2.gif",
                "https://i.4cdn.org/g/3.png",
                "https://i.4cdn.org/g/4.mp4",
            ]
        );
        assert_eq!(items[3].index, 4);
    }

    #[test]
    fn test_extract_rejects_unknown_shapes() {
        for doc in [json!(null), json!({"threads": []}), json!("posts"), json!(3)] {
            let err = extract(&doc, &target(), &MediaUrls::default()).unwrap_err();
            assert!(matches!(err, ApiError::Malformed { .. }), "{doc}");
        }
        let bad_posts = json!({"posts": "nope"});
        assert!(extract(&bad_posts, &target(), &MediaUrls::default()).is_err());
    }

    #[test]
    fn test_extract_empty_thread() {
        let items = extract(&json!({"posts": []}), &target(), &MediaUrls::default()).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_extract_into_continues_numbering() {
        let urls = MediaUrls::default();
        let catalog = Arc::new(Target::catalog("g"));
        let mut items = Vec::new();
        let first = json!({"posts": [{"no": 1, "tim": 1, "ext": ".jpg"}, {"no": 2, "tim": 2, "ext": ".png"}]});
        let second = json!({"posts": [{"no": 3, "tim": 3, "ext": ".webm"}]});

        assert_eq!(extract_into(&mut items, &first, &catalog, &urls).unwrap(), 2);
        assert_eq!(extract_into(&mut items, &second, &catalog, &urls).unwrap(), 1);
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].index, 3);
        assert_eq!(items[2].suggested_filename, "3.webm");
    }

    #[test]
    fn test_thread_numbers() {
        let doc = json!([
            {"page": 1, "threads": [{"no": 5}, {"no": 7}]},
            {"page": 2, "threads": [{"no": 9}]},
        ]);
        assert_eq!(thread_numbers(&doc), vec![5, 7, 9]);
        assert!(thread_numbers(&json!({"posts": []})).is_empty());
    }

    #[test]
    fn test_thread_title_prefers_subject() {
        let doc = json!({"posts": [{"no": 1, "sub": " Daily thread ", "com": "ignored"}]});
        assert_eq!(thread_title(&doc).as_deref(), Some("Daily thread"));
    }

    #[test]
    fn test_thread_title_from_comment() {
        let comment = format!("<b>Hello</b><br>   world {}", "x".repeat(100));
        let doc = json!({"posts": [{"no": 1, "com": comment}]});
        let title = thread_title(&doc).unwrap();
        assert!(title.starts_with("Hello world x"));
        assert!(title.chars().count() <= 60);
        assert!(thread_title(&json!({"posts": [{"no": 1}]})).is_none());
    }
}
