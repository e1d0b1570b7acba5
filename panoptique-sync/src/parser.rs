use crate::types::{RawEnclosure, RawItem, RawMedia, Result, SyncError};
use encoding_rs::{Encoding, UTF_8};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Atom,
    Rdf,
}

#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub kind: FeedKind,
    pub title: Option<String>,
    pub items: Vec<RawItem>,
}

/// Streaming RSS 2.0 / Atom / RDF parser.
///
/// Items are collected field by field without assuming any particular field is present.
/// The document must be well-formed XML with a feed root element; anything after the root
/// closes is ignored.
pub struct FeedParser;

impl FeedParser {
    /// Decode a raw feed body. A byte order mark wins, then the HTTP `charset`, then the
    /// encoding named in the XML declaration, then UTF-8. Undecodable bytes become U+FFFD.
    pub fn decode(bytes: &[u8], charset: Option<&str>) -> String {
        let encoding = charset
            .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
            .or_else(|| declared_encoding(bytes))
            .unwrap_or(UTF_8);
        let (text, used, had_errors) = encoding.decode(bytes);
        if had_errors {
            debug!("Feed body had bytes invalid in {}", used.name());
        }
        text.into_owned()
    }

    pub fn parse_feed(content: &str) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let content = content.trim_start_matches('\u{feff}');
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);

        let mut state = ParseState::default();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => state.open(&e)?,
                Ok(Event::Empty(e)) => {
                    state.open(&e)?;
                    state.close(true);
                }
                Ok(Event::End(_)) => state.close(false),
                Ok(Event::Text(e)) => {
                    let text = e
                        .unescape_with(resolve_html_entity)
                        .map(|cow| cow.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&e).into_owned());
                    state.text(&text);
                }
                Ok(Event::CData(e)) => {
                    let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    state.text(&text);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) if state.root_closed => {
                    debug!("Ignoring trailing garbage after feed root: {}", e);
                    break;
                }
                Err(e) => {
                    return Err(SyncError::Parse(format!(
                        "{} at byte {}",
                        e,
                        reader.buffer_position()
                    )));
                }
            }
            if state.root_closed {
                break;
            }
        }

        let kind = state
            .kind
            .ok_or_else(|| SyncError::Parse("document has no root element".to_string()))?;
        if !state.root_closed {
            return Err(SyncError::Parse("unexpected end of document".to_string()));
        }

        info!("Parsed {:?} feed with {} items", kind, state.items.len());

        Ok(ParsedFeed {
            kind,
            title: state.feed_title,
            items: state.items,
        })
    }
}

fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    match reader.read_event_into(&mut buf) {
        Ok(Event::Decl(decl)) => {
            let label = decl.encoding()?.ok()?;
            Encoding::for_label(&label)
        }
        _ => None,
    }
}

/// The XML entities plus the HTML ones that show up unescaped in feeds even though XML does
/// not define them.
fn resolve_html_entity(entity: &str) -> Option<&'static str> {
    match entity {
        "lt" => Some("<"),
        "gt" => Some(">"),
        "amp" => Some("&"),
        "apos" => Some("'"),
        "quot" => Some("\""),
        "nbsp" => Some("\u{a0}"),
        "hellip" => Some("\u{2026}"),
        "mdash" => Some("\u{2014}"),
        "ndash" => Some("\u{2013}"),
        "lsquo" => Some("\u{2018}"),
        "rsquo" => Some("\u{2019}"),
        "ldquo" => Some("\u{201c}"),
        "rdquo" => Some("\u{201d}"),
        "laquo" => Some("\u{ab}"),
        "raquo" => Some("\u{bb}"),
        "copy" => Some("\u{a9}"),
        "reg" => Some("\u{ae}"),
        "eacute" => Some("\u{e9}"),
        "egrave" => Some("\u{e8}"),
        "agrave" => Some("\u{e0}"),
        "ccedil" => Some("\u{e7}"),
        _ => None,
    }
}

fn attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref().eq_ignore_ascii_case(name.as_bytes()))
        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
        .filter(|v| !v.is_empty())
}

fn set_if_empty(slot: &mut Option<String>, value: &str) {
    let value = value.trim();
    if slot.is_none() && !value.is_empty() {
        *slot = Some(value.to_string());
    }
}

#[derive(Default)]
struct ItemBuilder {
    item: RawItem,
    published: Option<String>,
    updated: Option<String>,
    dc_date: Option<String>,
    /// Depth of the item element in the element stack.
    depth: usize,
}

impl ItemBuilder {
    fn finish(mut self) -> RawItem {
        self.item.iso_date = self.published.or(self.updated).or(self.dc_date);
        self.item
    }
}

/// Fields whose nested elements are kept as markup instead of flattened to text.
const MARKUP_FIELDS: [&str; 4] = ["description", "content", "content:encoded", "summary"];

struct Frame {
    /// Lowercased, prefix kept.
    name: String,
    text: String,
    /// Raw open-tag content and raw name, set for elements nested inside a markup field.
    markup: Option<(String, String)>,
}

#[derive(Default)]
struct ParseState {
    kind: Option<FeedKind>,
    root_closed: bool,
    feed_title: Option<String>,
    stack: Vec<Frame>,
    current: Option<ItemBuilder>,
    items: Vec<RawItem>,
}

impl ParseState {
    fn open(&mut self, e: &BytesStart<'_>) -> Result<()> {
        let name = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();

        if self.kind.is_none() {
            let local = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
            self.kind = Some(match local.as_str() {
                "rss" => FeedKind::Rss,
                "feed" => FeedKind::Atom,
                "rdf" => FeedKind::Rdf,
                other => {
                    return Err(SyncError::Parse(format!(
                        "not an RSS/Atom/RDF document (root element <{}>)",
                        other
                    )))
                }
            });
        }

        let markup = self
            .current
            .as_ref()
            .filter(|builder| self.stack.len() > builder.depth)
            .and_then(|builder| self.stack.get(builder.depth))
            .filter(|field| MARKUP_FIELDS.contains(&field.name.as_str()))
            .map(|_| {
                (
                    String::from_utf8_lossy(e).into_owned(),
                    String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                )
            });
        self.stack.push(Frame {
            name: name.clone(),
            text: String::new(),
            markup,
        });

        match self.current.as_mut() {
            None if name == "item" || name == "entry" => {
                self.current = Some(ItemBuilder {
                    depth: self.stack.len(),
                    ..Default::default()
                });
            }
            Some(builder) => Self::item_attributes(builder, &name, e),
            None => {}
        }
        Ok(())
    }

    fn item_attributes(builder: &mut ItemBuilder, name: &str, e: &BytesStart<'_>) {
        let item = &mut builder.item;
        match name {
            "media:thumbnail" => {
                if let Some(url) = attr(e, "url") {
                    item.media_thumbnails.push(url);
                }
            }
            "media:content" => item.media_contents.push(RawMedia {
                url: attr(e, "url"),
                medium: attr(e, "medium"),
                mime: attr(e, "type"),
            }),
            "enclosure" => {
                if item.enclosure.is_none() {
                    item.enclosure = Some(RawEnclosure {
                        url: attr(e, "url"),
                        mime: attr(e, "type"),
                    });
                }
            }
            // Atom links carry the URL in attributes; RSS links carry it as text.
            "link" => {
                if let Some(href) = attr(e, "href") {
                    match attr(e, "rel").as_deref() {
                        None | Some("alternate") => set_if_empty(&mut item.link, &href),
                        Some("enclosure") if item.enclosure.is_none() => {
                            item.enclosure = Some(RawEnclosure {
                                url: Some(href),
                                mime: attr(e, "type"),
                            });
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(frame) = self.stack.last_mut() {
            if frame.markup.is_some() {
                frame.text.push_str(&escape(text));
            } else {
                frame.text.push_str(text);
            }
        }
    }

    fn close(&mut self, empty: bool) {
        let Some(Frame { name, text, markup }) = self.stack.pop() else {
            return;
        };
        let depth = self.stack.len() + 1;

        if depth == 1 {
            self.root_closed = true;
            return;
        }

        let Some(builder) = self.current.as_mut() else {
            let parent = self.stack.last().map(|p| p.name.as_str());
            if name == "title" && matches!(parent, Some("channel") | Some("feed")) {
                set_if_empty(&mut self.feed_title, &text);
            }
            return;
        };

        if depth == builder.depth {
            if let Some(builder) = self.current.take() {
                self.items.push(builder.finish());
            }
            return;
        }

        let parent = self.stack.last().map(|p| p.name.clone()).unwrap_or_default();
        if name == "name" && parent == "author" {
            set_if_empty(&mut builder.item.author, &text);
        }

        if depth > builder.depth + 1 {
            // Inline XHTML is re-serialized into the field; other nesting contributes its text.
            let nested = match markup {
                Some((open, _)) if empty => format!("<{}/>", open),
                Some((open, raw_name)) => format!("<{}>{}</{}>", open, text, raw_name),
                None => text,
            };
            if let Some(parent) = self.stack.last_mut() {
                parent.text.push_str(&nested);
            }
            return;
        }

        let item = &mut builder.item;
        match name.as_str() {
            "title" => set_if_empty(&mut item.title, &text),
            "link" => set_if_empty(&mut item.link, &text),
            "guid" | "id" => set_if_empty(&mut item.guid, &text),
            "pubdate" => set_if_empty(&mut item.pub_date, &text),
            "published" | "issued" => set_if_empty(&mut builder.published, &text),
            "updated" | "modified" => set_if_empty(&mut builder.updated, &text),
            "dc:date" => set_if_empty(&mut builder.dc_date, &text),
            "description" | "content" => set_if_empty(&mut item.content, &text),
            "content:encoded" => set_if_empty(&mut item.content_encoded, &text),
            "summary" => set_if_empty(&mut item.summary, &text),
            "dc:creator" => set_if_empty(&mut item.creator, &text),
            "author" => set_if_empty(&mut item.author, &text),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/"
     xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Example News</title>
    <link>https://example.com/</link>
    <item>
      <title>First &amp; foremost</title>
      <link>https://example.com/1</link>
      <guid isPermaLink="false">abc-1</guid>
      <pubDate>Mon, 21 Oct 2024 07:28:00 GMT</pubDate>
      <description>&lt;p&gt;Escaped &lt;b&gt;html&lt;/b&gt;&amp;nbsp;body&lt;/p&gt;</description>
      <content:encoded><![CDATA[<p>Full <em>content</em></p>]]></content:encoded>
      <dc:creator>Jane Doe</dc:creator>
      <enclosure url="https://example.com/a.mp3" type="audio/mpeg" length="1"/>
      <media:thumbnail url="https://example.com/thumb.jpg"/>
      <media:content url="https://example.com/video.mp4" medium="video"/>
    </item>
    <item>
      <title>No link</title>
      <description>Nothing to point at</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_rss_items_and_extensions() {
        let feed = FeedParser::parse_feed(RSS).expect("parse");
        assert_eq!(feed.kind, FeedKind::Rss);
        assert_eq!(feed.title.as_deref(), Some("Example News"));
        assert_eq!(feed.items.len(), 2);

        let first = &feed.items[0];
        assert_eq!(first.title.as_deref(), Some("First & foremost"));
        assert_eq!(first.link.as_deref(), Some("https://example.com/1"));
        assert_eq!(first.guid.as_deref(), Some("abc-1"));
        assert_eq!(first.pub_date.as_deref(), Some("Mon, 21 Oct 2024 07:28:00 GMT"));
        assert_eq!(
            first.content.as_deref(),
            Some("<p>Escaped <b>html</b>&nbsp;body</p>")
        );
        assert_eq!(
            first.content_encoded.as_deref(),
            Some("<p>Full <em>content</em></p>")
        );
        assert_eq!(first.creator.as_deref(), Some("Jane Doe"));
        assert_eq!(
            first.enclosure.as_ref().and_then(|e| e.mime.as_deref()),
            Some("audio/mpeg")
        );
        assert_eq!(first.media_thumbnails, vec!["https://example.com/thumb.jpg"]);
        assert_eq!(first.media_contents[0].medium.as_deref(), Some("video"));

        let second = &feed.items[1];
        assert!(second.link.is_none());
        assert!(second.guid.is_none());
    }

    #[test]
    fn parses_atom_entries() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Blog</title>
  <entry>
    <title>Hello</title>
    <link rel="alternate" href="https://blog.example.com/hello"/>
    <link rel="enclosure" type="image/png" href="https://blog.example.com/hello.png"/>
    <id>urn:uuid:1</id>
    <updated>2024-10-20T10:00:00Z</updated>
    <published>2024-10-19T10:00:00Z</published>
    <author><name>Ann</name><email>ann@example.com</email></author>
    <summary>Short</summary>
    <content type="html">&lt;p&gt;Long&lt;/p&gt;</content>
  </entry>
</feed>"#;
        let feed = FeedParser::parse_feed(atom).expect("parse");
        assert_eq!(feed.kind, FeedKind::Atom);
        assert_eq!(feed.title.as_deref(), Some("Atom Blog"));
        let entry = &feed.items[0];
        assert_eq!(entry.link.as_deref(), Some("https://blog.example.com/hello"));
        assert_eq!(entry.guid.as_deref(), Some("urn:uuid:1"));
        assert_eq!(entry.iso_date.as_deref(), Some("2024-10-19T10:00:00Z"));
        assert_eq!(entry.author.as_deref(), Some("Ann"));
        assert_eq!(entry.summary.as_deref(), Some("Short"));
        assert_eq!(entry.content.as_deref(), Some("<p>Long</p>"));
        assert_eq!(
            entry.enclosure.as_ref().and_then(|e| e.url.as_deref()),
            Some("https://blog.example.com/hello.png")
        );
    }

    #[test]
    fn atom_xhtml_content_keeps_its_markup() {
        let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title>Inline</title>
    <link href="https://blog.example.com/inline"/>
    <content type="xhtml">
      <div xmlns="http://www.w3.org/1999/xhtml">
        <p>First paragraph that is long enough &amp; then some.</p>
        <img src="https://blog.example.com/pic.jpg"/>
      </div>
    </content>
  </entry>
</feed>"#;
        let feed = FeedParser::parse_feed(atom).expect("parse");
        let entry = &feed.items[0];
        let content = entry.content.as_deref().expect("content");
        assert!(content.contains("<p>First paragraph that is long enough &amp; then some.</p>"));
        assert!(content.contains(r#"<img src="https://blog.example.com/pic.jpg"/>"#));
        assert!(content.ends_with("</div>"));

        let draft = crate::normalizer::normalize(entry, 1).expect("draft");
        assert_eq!(
            draft.image_url.as_deref(),
            Some("https://blog.example.com/pic.jpg")
        );
        assert_eq!(
            draft.excerpt.as_deref(),
            Some("First paragraph that is long enough & then some.")
        );
    }

    #[test]
    fn nested_elements_outside_content_fields_flatten_to_text() {
        let rss = "<rss><channel><item><link>https://e/1</link>\
                   <title><b>Bold</b></title></item></channel></rss>";
        let feed = FeedParser::parse_feed(rss).expect("parse");
        assert_eq!(feed.items[0].title.as_deref(), Some("Bold"));
    }

    #[test]
    fn parses_rdf_items() {
        let rdf = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel rdf:about="https://example.org/"><title>RDF</title></channel>
  <item rdf:about="https://example.org/a">
    <title>A</title>
    <link>https://example.org/a</link>
    <dc:date>2024-01-02T03:04:05Z</dc:date>
  </item>
</rdf:RDF>"#;
        let feed = FeedParser::parse_feed(rdf).expect("parse");
        assert_eq!(feed.kind, FeedKind::Rdf);
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].iso_date.as_deref(), Some("2024-01-02T03:04:05Z"));
    }

    #[test]
    fn decode_follows_declaration_unless_charset_overrides() {
        let latin1 = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><rss><channel><item>\
<title>Caf\xe9</title><link>https://e/1</link></item></channel></rss>";
        let decoded = FeedParser::decode(latin1, None);
        let feed = FeedParser::parse_feed(&decoded).expect("parse");
        assert_eq!(feed.items[0].title.as_deref(), Some("Caf\u{e9}"));

        let utf8 = "<rss><channel><item><title>Caf\u{e9}</title></item></channel></rss>";
        assert_eq!(FeedParser::decode(utf8.as_bytes(), None), utf8);
        assert_ne!(FeedParser::decode(utf8.as_bytes(), Some("windows-1252")), utf8);
        assert_eq!(FeedParser::decode(b"\xef\xbb\xbf<rss/>", Some("iso-8859-1")), "<rss/>");
    }

    #[test]
    fn empty_channel_is_not_an_error() {
        let feed = FeedParser::parse_feed(r#"<rss version="2.0"><channel><title>T</title></channel></rss>"#)
            .expect("parse");
        assert!(feed.items.is_empty());
    }

    #[test]
    fn html_document_is_rejected() {
        let err = FeedParser::parse_feed("<html><body>Not a feed</body></html>").unwrap_err();
        assert!(matches!(err, SyncError::Parse(_)));
    }

    #[test]
    fn mismatched_tags_are_rejected() {
        let broken = "<rss><channel><item><title>x</item></channel></rss>";
        assert!(FeedParser::parse_feed(broken).is_err());
    }

    #[test]
    fn truncated_document_is_rejected() {
        let truncated = "<rss><channel><item><title>x</title>";
        assert!(FeedParser::parse_feed(truncated).is_err());
    }

    #[test]
    fn trailing_garbage_after_root_is_ignored() {
        let feed = FeedParser::parse_feed(
            "<rss><channel><item><link>https://e/1</link></item></channel></rss>\n<!-- cache --><junk",
        )
        .expect("parse");
        assert_eq!(feed.items.len(), 1);
    }
}
