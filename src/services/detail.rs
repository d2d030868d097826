//! Detail pane loading and isolated body rendering.
//!
//! Email bodies are untrusted HTML. They never reach the terminal as markup:
//! [`render_isolated`] strips active content, refuses to fetch remote
//! images, and converts what is left to wrapped plain text. Rendering runs on
//! the blocking pool under a safety timeout so a pathological body cannot
//! stall the controller.

use std::borrow::Cow;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use thiserror::Error;

use super::store::EmailStore;
use crate::config::DetailSettings;
use crate::domain::{looks_like_html, ActionItem, Address, Email, EmailId, PriorityLevel};

/// Elements whose content is dropped entirely before rendering.
const ACTIVE_ELEMENTS: &[&str] = &["script", "style", "iframe", "object", "embed", "noscript"];

/// Errors that can occur while loading the detail pane.
#[derive(Debug, Error)]
pub enum DetailError {
    #[error("email not found: {0}")]
    NotFound(EmailId),

    #[error("body rendering task failed: {0}")]
    RenderTask(String),
}

/// Result type for detail operations.
pub type DetailResult<T> = Result<T, DetailError>;

/// Body text produced by the isolated renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedBody {
    /// Wrapped plain text.
    pub text: String,
    /// Rendered height in lines.
    pub height: usize,
    /// Remote image URLs that were not fetched.
    pub blocked_images: Vec<String>,
    /// True if rendering hit the safety timeout and `text` is a fallback.
    pub timed_out: bool,
}

impl RenderedBody {
    fn from_text(text: String, blocked_images: Vec<String>) -> Self {
        let height = text.lines().count().max(1);
        Self {
            text,
            height,
            blocked_images,
            timed_out: false,
        }
    }

    fn timed_out(body: &str) -> Self {
        let text = format!(
            "[Message body is still rendering; showing {} bytes of raw content]",
            body.len()
        );
        Self {
            text,
            height: 1,
            blocked_images: Vec::new(),
            timed_out: true,
        }
    }
}

/// Everything the detail pane shows for one email.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailView {
    pub id: EmailId,
    pub subject: String,
    pub sender: Address,
    pub recipients: Vec<Address>,
    pub date: DateTime<Utc>,
    pub priority: Option<PriorityLevel>,
    pub category: Option<String>,
    pub summary: Option<String>,
    pub needs_action: bool,
    pub action_items: Vec<ActionItem>,
    pub custom_categories: Vec<(String, String)>,
    pub is_analyzed: bool,
    pub body: RenderedBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BodyKey {
    id: EmailId,
    digest: u64,
    width: usize,
}

impl BodyKey {
    fn new(email: &Email, width: usize) -> Self {
        let mut hasher = DefaultHasher::new();
        email.body.hash(&mut hasher);
        Self {
            id: email.id.clone(),
            digest: hasher.finish(),
            width,
        }
    }
}

/// Builds [`DetailView`]s, caching rendered bodies.
pub struct DetailLoader {
    cache: LruCache<BodyKey, RenderedBody>,
    width: usize,
    timeout: Duration,
}

impl DetailLoader {
    /// Creates a loader wrapping bodies at `width` columns.
    pub fn new(settings: &DetailSettings, width: usize) -> Self {
        let capacity = NonZeroUsize::new(settings.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            width: width.max(20),
            timeout: settings.render_timeout(),
        }
    }

    /// Number of rendered bodies currently cached.
    pub fn cached_bodies(&self) -> usize {
        self.cache.len()
    }

    /// Loads the detail view for `id`.
    ///
    /// Returns [`DetailError::NotFound`] if the store has no such record; the
    /// caller keeps whatever it was showing before.
    pub async fn load(&mut self, store: &EmailStore, id: &EmailId) -> DetailResult<DetailView> {
        let email = store
            .get_by_id(id)
            .ok_or_else(|| DetailError::NotFound(id.clone()))?;

        let key = BodyKey::new(email, self.width);
        let body = match self.cache.get(&key) {
            Some(body) => body.clone(),
            None => {
                let body = self.render_body(&email.body).await?;
                if !body.timed_out {
                    self.cache.put(key, body.clone());
                }
                body
            }
        };

        Ok(DetailView {
            id: email.id.clone(),
            subject: email.subject.clone(),
            sender: email.sender_address(),
            recipients: email.recipient_addresses(),
            date: email.date,
            priority: email.priority_level,
            category: email.category.clone(),
            summary: email.summary.clone(),
            needs_action: email.needs_action,
            action_items: email.action_items.clone(),
            custom_categories: email.custom_category_labels(),
            is_analyzed: email.is_analyzed,
            body,
        })
    }

    async fn render_body(&self, body: &str) -> DetailResult<RenderedBody> {
        let owned = body.to_string();
        let width = self.width;
        let task = tokio::task::spawn_blocking(move || render_isolated(&owned, width));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(rendered)) => Ok(rendered),
            Ok(Err(e)) => Err(DetailError::RenderTask(e.to_string())),
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "Body rendering timed out");
                Ok(RenderedBody::timed_out(body))
            }
        }
    }
}

/// Renders an untrusted body to plain text without executing or fetching anything.
pub fn render_isolated(body: &str, width: usize) -> RenderedBody {
    if !looks_like_html(body) {
        let text = body.replace("\r\n", "\n");
        let text = strip_control_chars(text.trim_end());
        return RenderedBody::from_text(text.into_owned(), Vec::new());
    }

    let inert = strip_active_content(body);
    let blocked_images = remote_image_urls(&inert);
    let text = html2text::from_read(inert.as_bytes(), width)
        .unwrap_or_else(|_| "[HTML rendering error]".to_string());
    let text = strip_control_chars(text.trim_end());
    RenderedBody::from_text(text.into_owned(), blocked_images)
}

/// Removes control characters other than newline and tab.
///
/// Terminal escape sequences start with ESC or a C1 control, so text passed
/// through here cannot move the cursor, retitle the window or clear the
/// screen.
pub fn strip_control_chars(text: &str) -> Cow<'_, str> {
    let unsafe_char = |c: char| c.is_control() && c != '\n' && c != '\t';
    if !text.contains(unsafe_char) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.chars().filter(|&c| !unsafe_char(c)).collect())
}

/// Removes active elements and their content.
///
/// Matching runs on an ASCII-lowercased copy, which keeps byte offsets
/// aligned with the original.
pub fn strip_active_content(html: &str) -> String {
    let mut out = html.to_string();
    for tag in ACTIVE_ELEMENTS {
        out = strip_element(&out, tag);
    }
    out
}

fn strip_element(html: &str, tag: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}");

    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    while let Some(found) = lower[cursor..].find(&open) {
        let start = cursor + found;
        let after = start + open.len();
        let boundary = lower[after..].chars().next();
        if !matches!(boundary, Some(c) if c.is_ascii_whitespace() || c == '>' || c == '/') {
            out.push_str(&html[cursor..after]);
            cursor = after;
            continue;
        }

        out.push_str(&html[cursor..start]);
        let open_end = match lower[after..].find('>') {
            Some(i) => after + i + 1,
            None => return out,
        };
        let self_closing = lower[..open_end].ends_with("/>");
        cursor = if self_closing || tag == "embed" {
            open_end
        } else {
            match lower[open_end..].find(&close) {
                Some(i) => {
                    let close_start = open_end + i;
                    lower[close_start..]
                        .find('>')
                        .map_or(html.len(), |j| close_start + j + 1)
                }
                // Unterminated active element: drop the rest.
                None => html.len(),
            }
        };
    }
    out.push_str(&html[cursor..]);
    out
}

/// Collects `src` URLs of `<img>` tags that point off-message.
fn remote_image_urls(html: &str) -> Vec<String> {
    let lower = html.to_ascii_lowercase();
    let mut urls = Vec::new();
    let mut cursor = 0;
    while let Some(found) = lower[cursor..].find("<img") {
        let start = cursor + found;
        let end = lower[start..].find('>').map_or(lower.len(), |i| start + i);
        let tag = &html[start..end];
        if let Some(src) = attribute(tag, "src") {
            let src_lower = src.to_ascii_lowercase();
            if src_lower.starts_with("http://")
                || src_lower.starts_with("https://")
                || src_lower.starts_with("//")
            {
                urls.push(src.to_string());
            }
        }
        cursor = end;
    }
    urls
}

fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let lower = tag.to_ascii_lowercase();
    let needle = format!("{name}=");
    let mut search = 0;
    while let Some(i) = lower[search..].find(&needle) {
        let at = search + i;
        let preceded_ok = lower[..at]
            .chars()
            .last()
            .is_some_and(|c| c.is_ascii_whitespace());
        let value_start = at + needle.len();
        if preceded_ok {
            let rest = &tag[value_start..];
            return Some(match rest.chars().next() {
                Some(quote @ ('"' | '\'')) => {
                    let inner = &rest[1..];
                    inner.find(quote).map_or(inner, |j| &inner[..j])
                }
                _ => rest
                    .split(|c: char| c.is_ascii_whitespace() || c == '>')
                    .next()
                    .unwrap_or(""),
            });
        }
        search = value_start;
    }
    None
}

/// Groups action items by due date for display; undated items come last.
pub fn action_items_by_due_date(items: &[ActionItem]) -> BTreeMap<Option<String>, Vec<String>> {
    let mut grouped: BTreeMap<Option<String>, Vec<String>> = BTreeMap::new();
    for item in items {
        grouped
            .entry(item.due_date.clone())
            .or_default()
            .push(item.description.clone());
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings() -> DetailSettings {
        DetailSettings {
            render_timeout_ms: 2_000,
            cache_capacity: 4,
        }
    }

    fn store_with(body: &str) -> EmailStore {
        let mut email = Email::new("m-1", Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        email.subject = "Hello".to_string();
        email.sender = "Ada <ada@example.com>".to_string();
        email.recipients = vec!["me@example.com".to_string()];
        email.body = body.to_string();
        let mut store = EmailStore::new(10);
        store.add_many(vec![email], true);
        store
    }

    #[test]
    fn scripts_and_styles_are_removed() {
        let html = "<p>Hi</p><SCRIPT type=\"text/javascript\">alert('x')</script>\
                    <style>p { color: red }</style><p>Bye</p>";
        let stripped = strip_active_content(html);
        assert_eq!(stripped, "<p>Hi</p><p>Bye</p>");
    }

    #[test]
    fn similarly_named_tags_survive() {
        let html = "<styles>keep</styles><p>text</p>";
        assert_eq!(strip_active_content(html), html);
    }

    #[test]
    fn unterminated_script_drops_the_rest() {
        let html = "<p>ok</p><script>while(true){}";
        assert_eq!(strip_active_content(html), "<p>ok</p>");
    }

    #[test]
    fn embed_and_self_closing_iframe_are_removed() {
        let html = "<div>a<embed src=\"x.swf\">b<iframe src=\"https://evil\"/>c</div>";
        assert_eq!(strip_active_content(html), "<div>abc</div>");
    }

    #[test]
    fn remote_images_are_blocked_and_reported() {
        let html = r#"<div><img src="https://tracker.example/p.gif" width=1>
                      <img alt="logo" src='cid:logo@x'>
                      <IMG SRC=//cdn.example/a.png></div>"#;
        assert_eq!(
            remote_image_urls(html),
            vec![
                "https://tracker.example/p.gif".to_string(),
                "//cdn.example/a.png".to_string(),
            ]
        );
    }

    #[test]
    fn data_src_attribute_is_not_confused_with_src() {
        assert_eq!(attribute(r#"<img data-src="a" src="b">"#, "src"), Some("b"));
    }

    #[test]
    fn html_body_renders_to_text_with_height() {
        let rendered = render_isolated(
            "<html><body><p>First line</p><p>Second line</p><script>evil()</script></body></html>",
            60,
        );
        assert!(rendered.text.contains("First line"));
        assert!(rendered.text.contains("Second line"));
        assert!(!rendered.text.contains("evil"));
        assert_eq!(rendered.height, rendered.text.lines().count());
        assert!(!rendered.timed_out);
    }

    #[test]
    fn plain_body_passes_through() {
        let rendered = render_isolated("line one\r\nline two\r\n", 60);
        assert_eq!(rendered.text, "line one\nline two");
        assert_eq!(rendered.height, 2);
    }

    #[test]
    fn escape_sequences_are_removed_from_plain_bodies() {
        let rendered = render_isolated("\x1b]0;pwned\x07\x1b[2JHello\tthere\u{9b}31m", 60);
        assert_eq!(rendered.text, "]0;pwned[2JHello\tthere31m");
        assert!(!rendered.text.chars().any(|c| c.is_control() && c != '\t'));
    }

    #[test]
    fn escape_sequences_are_removed_from_html_bodies() {
        let rendered = render_isolated("<p>\x1b[2Jhi</p><p>\x1b]8;;https://evil\x07link</p>", 60);
        assert!(rendered.text.contains("hi"));
        assert!(!rendered.text.contains('\x1b'));
        assert!(!rendered.text.contains('\x07'));
    }

    #[test]
    fn clean_text_is_borrowed() {
        assert!(matches!(strip_control_chars("line\n\tok"), Cow::Borrowed(_)));
        assert_eq!(strip_control_chars("a\rb\x00c"), "abc");
    }

    #[test]
    fn empty_body_has_height_one() {
        assert_eq!(render_isolated("", 60).height, 1);
    }

    #[test]
    fn action_items_group_by_due_date() {
        let items = vec![
            ActionItem {
                description: "Pay".to_string(),
                due_date: Some("2024-02-01".to_string()),
            },
            ActionItem {
                description: "Read".to_string(),
                due_date: None,
            },
            ActionItem {
                description: "File".to_string(),
                due_date: Some("2024-02-01".to_string()),
            },
        ];
        let grouped = action_items_by_due_date(&items);
        assert_eq!(
            grouped.get(&Some("2024-02-01".to_string())),
            Some(&vec!["Pay".to_string(), "File".to_string()])
        );
        assert_eq!(grouped.get(&None), Some(&vec!["Read".to_string()]));
    }

    #[tokio::test]
    async fn load_builds_view_and_caches_body() {
        let store = store_with("<p>Body</p>");
        let mut loader = DetailLoader::new(&settings(), 60);

        let view = loader.load(&store, &EmailId::from("m-1")).await.unwrap();
        assert_eq!(view.subject, "Hello");
        assert_eq!(view.sender, Address::with_name("ada@example.com", "Ada"));
        assert_eq!(view.recipients, vec![Address::new("me@example.com")]);
        assert!(view.body.text.contains("Body"));
        assert_eq!(loader.cached_bodies(), 1);

        loader.load(&store, &EmailId::from("m-1")).await.unwrap();
        assert_eq!(loader.cached_bodies(), 1);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = store_with("hi");
        let mut loader = DetailLoader::new(&settings(), 60);
        let result = loader.load(&store, &EmailId::from("nope")).await;
        assert!(matches!(result, Err(DetailError::NotFound(id)) if id.as_str() == "nope"));
    }

    #[tokio::test]
    async fn changed_body_is_rendered_again() {
        let mut store = store_with("<p>First</p>");
        let mut loader = DetailLoader::new(&settings(), 60);
        loader.load(&store, &EmailId::from("m-1")).await.unwrap();

        let mut updated = store.get_by_id(&EmailId::from("m-1")).unwrap().clone();
        updated.body = "<p>Second</p>".to_string();
        store.add_many(vec![updated], true);

        let view = loader.load(&store, &EmailId::from("m-1")).await.unwrap();
        assert!(view.body.text.contains("Second"));
        assert_eq!(loader.cached_bodies(), 2);
    }
}
