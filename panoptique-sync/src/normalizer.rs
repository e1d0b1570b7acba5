use crate::rss_utils::{html, time, url};
use crate::types::{ArticleDraft, RawItem};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Upper bound on HTML handed to the regex passes, keeps one huge item from stalling the runtime.
const MAX_HTML_BYTES: usize = 256 * 1024;
const EXCERPT_MAX_CHARS: usize = 1000;
const DESCRIPTION_MAX_CHARS: usize = 300;
const SUMMARY_MAX_CHARS: usize = 300;
const MAX_EXCERPT_PARAGRAPHS: usize = 6;
const MIN_PARAGRAPH_CHARS: usize = 20;
const TITLE_MAX_CHARS: usize = 500;

static PARAGRAPH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<p\b[^>]*>(.*?)</p\s*>").expect("valid regex"));
static LINE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"));
static BLANK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));
static IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("valid regex")
});
static ELLIPSIS_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\s*(?:\.\.\.|…)\s*\]").expect("valid regex"));

/// Turn one raw feed item into an article draft for `source_id`.
///
/// Returns `Err` with an item-level message when the item has neither a link nor a guid;
/// every other missing field falls back to a default or stays unset.
pub fn normalize(item: &RawItem, source_id: i64) -> std::result::Result<ArticleDraft, String> {
    let url = resolve_url(item).ok_or_else(|| {
        format!(
            "Item \"{}\" has no link or guid",
            item.title.as_deref().map(str::trim).unwrap_or("Untitled")
        )
    })?;

    let title = item
        .title
        .as_deref()
        .map(html::to_plain_text)
        .filter(|t| !t.is_empty())
        .map(|t| truncate_chars(&t, TITLE_MAX_CHARS).to_string())
        .unwrap_or_else(|| "Untitled".to_string());

    let raw_content = resolve_content(item).map(|c| html::clamp(c, MAX_HTML_BYTES));
    let content = raw_content.map(html::sanitize).filter(|c| !c.trim().is_empty());

    let summary = resolve_summary(item);
    let description = summary.clone().or_else(|| {
        content
            .as_deref()
            .map(|c| generate_excerpt(&html::to_plain_text(c), DESCRIPTION_MAX_CHARS))
            .filter(|d| !d.is_empty())
    });
    let excerpt = content.as_deref().and_then(extract_excerpt);
    let image_url = extract_image(item, raw_content);

    debug!(
        "Normalized item {} (image: {}, excerpt: {})",
        url,
        image_url.is_some(),
        excerpt.is_some()
    );

    Ok(ArticleDraft {
        source_id,
        title,
        url,
        content,
        summary,
        description,
        excerpt,
        image_url,
        author: resolve_author(item),
        published_at: resolve_date(item),
        is_read: false,
        is_favorite: false,
        is_archived: false,
    })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub fn resolve_url(item: &RawItem) -> Option<String> {
    non_empty(&item.link)
        .or_else(|| non_empty(&item.guid))
        .map(str::to_string)
}

fn resolve_content(item: &RawItem) -> Option<&str> {
    non_empty(&item.content_encoded)
        .or_else(|| non_empty(&item.content))
        .or_else(|| non_empty(&item.summary))
}

/// Plain-text snippet of the item body, capped at 300 characters.
fn resolve_summary(item: &RawItem) -> Option<String> {
    let source = non_empty(&item.content)
        .or_else(|| non_empty(&item.content_encoded))
        .or_else(|| non_empty(&item.summary))?;
    let text = remove_ellipsis_markers(&html::to_plain_text(html::clamp(source, MAX_HTML_BYTES)));
    if text.is_empty() {
        return None;
    }
    if text.chars().count() > SUMMARY_MAX_CHARS {
        Some(format!(
            "{}...",
            truncate_chars(&text, SUMMARY_MAX_CHARS - 3).trim_end()
        ))
    } else {
        Some(text)
    }
}

fn resolve_author(item: &RawItem) -> Option<String> {
    non_empty(&item.creator)
        .or_else(|| non_empty(&item.author))
        .map(html::to_plain_text)
        .filter(|a| !a.is_empty())
}

fn resolve_date(item: &RawItem) -> Option<chrono::DateTime<chrono::Utc>> {
    non_empty(&item.iso_date)
        .and_then(|d| time::parse_iso_date(d).or_else(|| time::parse_feed_date(d)))
        .or_else(|| non_empty(&item.pub_date).and_then(time::parse_feed_date))
}

/// Absolute http(s) form of an image reference; relative references resolve against `base`.
fn usable_image(candidate: &str, base: Option<&str>) -> Option<String> {
    let candidate = html::decode_entities(candidate.trim());
    if candidate.is_empty() {
        return None;
    }
    let candidate = if candidate.starts_with("//") {
        format!("https:{}", candidate)
    } else {
        candidate
    };
    if url::is_http_url(&candidate) {
        return Some(candidate);
    }
    url::resolve_against(base?, &candidate)
}

fn first_img_src(fragment: &str, base: Option<&str>) -> Option<String> {
    IMG_SRC.captures_iter(fragment).find_map(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .and_then(|m| usable_image(m.as_str(), base))
    })
}

/// First image in priority order: thumbnail, media content, enclosure, content `<img>`,
/// summary `<img>`.
pub fn extract_image(item: &RawItem, content: Option<&str>) -> Option<String> {
    let base = resolve_url(item);
    let base = base.as_deref();
    if let Some(url) = item.media_thumbnails.iter().find_map(|u| usable_image(u, base)) {
        return Some(url);
    }

    let from_media = item.media_contents.iter().find_map(|media| {
        let src = media.url.as_deref()?;
        let is_image = match media.medium.as_deref() {
            None => true,
            Some(medium) => medium.eq_ignore_ascii_case("image"),
        } || media
            .mime
            .as_deref()
            .is_some_and(|m| m.starts_with("image/"))
            || url::has_image_extension(src);
        if is_image {
            usable_image(src, base)
        } else {
            None
        }
    });
    if from_media.is_some() {
        return from_media;
    }

    if let Some(enclosure) = &item.enclosure {
        if let Some(src) = enclosure.url.as_deref() {
            let is_image = enclosure
                .mime
                .as_deref()
                .is_some_and(|m| m.starts_with("image/"))
                || url::has_image_extension(src);
            if let Some(found) = is_image.then(|| usable_image(src, base)).flatten() {
                return Some(found);
            }
        }
    }

    content
        .and_then(|c| first_img_src(c, base))
        .or_else(|| {
            non_empty(&item.summary).and_then(|s| first_img_src(html::clamp(s, MAX_HTML_BYTES), base))
        })
}

/// Excerpt from sanitized content: leading paragraphs, then blank-line separated blocks, then
/// a truncated plain-text rendition.
pub fn extract_excerpt(content: &str) -> Option<String> {
    let paragraphs: Vec<String> = PARAGRAPH
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| remove_ellipsis_markers(&html::to_plain_text(m.as_str())))
        .filter(|p| p.chars().count() > MIN_PARAGRAPH_CHARS)
        .take(MAX_EXCERPT_PARAGRAPHS)
        .collect();
    if !paragraphs.is_empty() {
        return Some(paragraphs.join("\n\n"));
    }

    let with_breaks = LINE_BREAK.replace_all(content, "\n");
    let text = html::decode_entities(&html::strip_tags_with(&with_breaks, ""));
    if BLANK_LINE.is_match(&text) {
        let blocks: Vec<String> = BLANK_LINE
            .split(&text)
            .map(|block| remove_ellipsis_markers(&html::collapse_whitespace(block)))
            .filter(|b| b.chars().count() > MIN_PARAGRAPH_CHARS)
            .take(MAX_EXCERPT_PARAGRAPHS)
            .collect();
        if !blocks.is_empty() {
            return Some(blocks.join("\n\n"));
        }
    }

    let excerpt = generate_excerpt(&html::to_plain_text(content), EXCERPT_MAX_CHARS);
    (!excerpt.is_empty()).then_some(excerpt)
}

fn remove_ellipsis_markers(text: &str) -> String {
    if !text.contains('[') {
        return text.to_string();
    }
    html::collapse_whitespace(&ELLIPSIS_MARKER.replace_all(text, ""))
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Cut plain text to at most `max_chars` characters.
///
/// Prefers the last sentence end inside the final fifth of the window, then the last word
/// boundary (with a trailing "..."), then a hard cut with "...".
pub fn generate_excerpt(text: &str, max_chars: usize) -> String {
    let text = remove_ellipsis_markers(&html::collapse_whitespace(text));
    if text.chars().count() <= max_chars {
        return text;
    }
    let threshold = max_chars * 4 / 5;

    let window = truncate_chars(&text, max_chars);
    let mut chars = window.char_indices().peekable();
    let mut sentence_end = None;
    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            if at_boundary {
                sentence_end = Some(idx + c.len_utf8());
            }
        }
    }
    if let Some(end) = sentence_end {
        if window[..end].chars().count() > threshold {
            return window[..end].to_string();
        }
    }

    let room = truncate_chars(&text, max_chars.saturating_sub(3));
    if let Some(space) = room.rfind(char::is_whitespace) {
        if room[..space].chars().count() > threshold {
            return format!("{}...", room[..space].trim_end());
        }
    }

    format!("{}...", room)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RawEnclosure, RawMedia};

    fn item(link: &str) -> RawItem {
        RawItem {
            title: Some("A title".to_string()),
            link: Some(link.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn thumbnail_wins_over_content_image() {
        let mut raw = item("https://x/post");
        raw.media_thumbnails = vec!["https://x/a.jpg".to_string()];
        raw.content = Some("<img src='https://x/b.jpg'>".to_string());
        let draft = normalize(&raw, 1).expect("draft");
        assert_eq!(draft.image_url.as_deref(), Some("https://x/a.jpg"));
    }

    #[test]
    fn media_content_with_non_image_medium_is_skipped() {
        let mut raw = item("https://x/post");
        raw.media_contents = vec![
            RawMedia {
                url: Some("https://x/clip.mp4".to_string()),
                medium: Some("video".to_string()),
                mime: None,
            },
            RawMedia {
                url: Some("https://x/still".to_string()),
                medium: None,
                mime: None,
            },
        ];
        let draft = normalize(&raw, 1).expect("draft");
        assert_eq!(draft.image_url.as_deref(), Some("https://x/still"));
    }

    #[test]
    fn enclosure_needs_image_type_or_extension() {
        let mut raw = item("https://x/post");
        raw.enclosure = Some(RawEnclosure {
            url: Some("https://x/episode.mp3".to_string()),
            mime: Some("audio/mpeg".to_string()),
        });
        raw.summary = Some(r#"<div><img class="x" src="https://x/from-summary.png"/></div>"#.to_string());
        raw.content_encoded = Some("<p>No pictures here at all, only words.</p>".to_string());
        let draft = normalize(&raw, 1).expect("draft");
        assert_eq!(draft.image_url.as_deref(), Some("https://x/from-summary.png"));
    }

    #[test]
    fn content_image_handles_unquoted_src() {
        let mut raw = item("https://x/post");
        raw.content = Some("<p>Hi</p><IMG width=1 src=https://x/c.gif>".to_string());
        assert_eq!(
            normalize(&raw, 1).expect("draft").image_url.as_deref(),
            Some("https://x/c.gif")
        );
    }

    #[test]
    fn relative_images_resolve_against_the_article_link() {
        let mut raw = item("https://x.test/posts/1");
        raw.content = Some(r#"<p>Body</p><img src="/img/a.jpg">"#.to_string());
        assert_eq!(
            normalize(&raw, 1).expect("draft").image_url.as_deref(),
            Some("https://x.test/img/a.jpg")
        );

        raw.content = None;
        raw.media_thumbnails = vec!["thumbs/b.png".to_string()];
        assert_eq!(
            normalize(&raw, 1).expect("draft").image_url.as_deref(),
            Some("https://x.test/posts/thumbs/b.png")
        );
    }

    #[test]
    fn relative_images_without_a_usable_base_are_dropped() {
        let mut raw = RawItem {
            guid: Some("urn:uuid:42".to_string()),
            content: Some(r#"<img src="/img/a.jpg">"#.to_string()),
            ..Default::default()
        };
        assert!(normalize(&raw, 1).expect("draft").image_url.is_none());

        raw.guid = Some("https://x.test/1".to_string());
        raw.content = Some(r#"<img src="data:image/png;base64,AAAA">"#.to_string());
        assert!(normalize(&raw, 1).expect("draft").image_url.is_none());
    }

    #[test]
    fn missing_image_is_not_an_error() {
        let draft = normalize(&item("https://x/post"), 1).expect("draft");
        assert!(draft.image_url.is_none());
    }

    #[test]
    fn url_falls_back_to_guid_and_then_fails() {
        let mut raw = RawItem {
            guid: Some("https://x/guid".to_string()),
            ..Default::default()
        };
        assert_eq!(normalize(&raw, 1).expect("draft").url, "https://x/guid");
        raw.guid = Some("   ".to_string());
        assert!(normalize(&raw, 1).is_err());
    }

    #[test]
    fn defaults_title_and_forces_flags_false() {
        let raw = RawItem {
            link: Some("https://x/1".to_string()),
            ..Default::default()
        };
        let draft = normalize(&raw, 7).expect("draft");
        assert_eq!(draft.title, "Untitled");
        assert_eq!(draft.source_id, 7);
        assert!(!draft.is_read && !draft.is_favorite && !draft.is_archived);
    }

    #[test]
    fn content_prefers_encoded_and_is_sanitized() {
        let mut raw = item("https://x/post");
        raw.content = Some("short description".to_string());
        raw.content_encoded =
            Some("<p onclick=\"x()\">Full body text</p><script>alert(1)</script>".to_string());
        let draft = normalize(&raw, 1).expect("draft");
        assert_eq!(draft.content.as_deref(), Some("<p>Full body text</p>"));
        assert_eq!(draft.summary.as_deref(), Some("short description"));
        assert_eq!(draft.description.as_deref(), Some("short description"));
    }

    #[test]
    fn summary_is_capped_at_300_chars() {
        let mut raw = item("https://x/post");
        raw.content = Some(format!("<p>{}</p>", "abcd ".repeat(100)));
        let summary = normalize(&raw, 1).expect("draft").summary.expect("summary");
        assert_eq!(summary.chars().count(), 300);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn author_prefers_creator() {
        let mut raw = item("https://x/post");
        raw.author = Some("editor@example.com (Editor)".to_string());
        raw.creator = Some("Jane".to_string());
        assert_eq!(normalize(&raw, 1).expect("draft").author.as_deref(), Some("Jane"));
        raw.creator = None;
        assert_eq!(
            normalize(&raw, 1).expect("draft").author.as_deref(),
            Some("editor@example.com (Editor)")
        );
    }

    #[test]
    fn date_prefers_iso_then_native_then_unset() {
        let mut raw = item("https://x/post");
        raw.iso_date = Some("2024-05-01T12:00:00Z".to_string());
        raw.pub_date = Some("Tue, 02 Jan 2024 10:00:00 GMT".to_string());
        let draft = normalize(&raw, 1).expect("draft");
        assert_eq!(draft.published_at.map(|d| d.to_rfc3339()).as_deref(), Some("2024-05-01T12:00:00+00:00"));

        raw.iso_date = None;
        let draft = normalize(&raw, 1).expect("draft");
        assert_eq!(draft.published_at.map(|d| d.to_rfc3339()).as_deref(), Some("2024-01-02T10:00:00+00:00"));

        raw.pub_date = Some("sometime last week".to_string());
        assert!(normalize(&raw, 1).expect("draft").published_at.is_none());
    }

    #[test]
    fn excerpt_uses_non_trivial_paragraphs() {
        let content = "<p>Too short</p><p>This paragraph is comfortably long enough.</p>\
                       <p>And so is this one, with [...] a marker removed.</p>";
        assert_eq!(
            extract_excerpt(content).as_deref(),
            Some("This paragraph is comfortably long enough.\n\nAnd so is this one, with a marker removed.")
        );
    }

    #[test]
    fn excerpt_caps_paragraph_count() {
        let content: String = (0..10)
            .map(|i| format!("<p>Paragraph number {} has enough characters.</p>", i))
            .collect();
        let excerpt = extract_excerpt(&content).expect("excerpt");
        assert_eq!(excerpt.split("\n\n").count(), 6);
    }

    #[test]
    fn excerpt_falls_back_to_blank_line_blocks() {
        let content = "First block of text that is long enough.<br><br>\
                       tiny<br/><br/>Second block, also long enough to keep.\n\n\
                       Third block is here and long enough too.";
        assert_eq!(
            extract_excerpt(content).as_deref(),
            Some(
                "First block of text that is long enough.\n\n\
                 Second block, also long enough to keep.\n\n\
                 Third block is here and long enough too."
            )
        );
    }

    #[test]
    fn excerpt_of_one_long_sentence_cuts_at_word_boundary() {
        let sentence = format!("{}end.", "lorem ipsum ".repeat(166));
        assert!(sentence.chars().count() >= 1990);
        let excerpt = extract_excerpt(&sentence).expect("excerpt");
        assert!(excerpt.chars().count() <= 1000);
        assert!(excerpt.ends_with("..."));
        let body = excerpt.trim_end_matches("...");
        assert!(body.ends_with("lorem") || body.ends_with("ipsum"));
    }

    #[test]
    fn generate_excerpt_prefers_sentence_end_in_tail() {
        let text = format!("{}. Tail words that overflow the limit", "a".repeat(90));
        assert_eq!(generate_excerpt(&text, 100), format!("{}.", "a".repeat(90)));
    }

    #[test]
    fn generate_excerpt_hard_cuts_without_boundaries() {
        let text = "x".repeat(50);
        let excerpt = generate_excerpt(&text, 20);
        assert_eq!(excerpt, format!("{}...", "x".repeat(17)));
    }
}
