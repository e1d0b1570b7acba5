/// Helpers shared by the parser, normalizer and maintenance routines.

/// HTML fragment utilities
pub mod html {
    use once_cell::sync::Lazy;
    use regex::Regex;

    static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
    static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

    static DANGEROUS_BLOCKS: Lazy<Vec<Regex>> = Lazy::new(|| {
        ["script", "iframe", "object", "embed", "style", "svg", "math"]
            .iter()
            .map(|tag| {
                Regex::new(&format!(r"(?is)<{tag}\b.*?</{tag}\s*>")).expect("valid regex")
            })
            .collect()
    });
    static DANGEROUS_SINGLE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)</?(script|iframe|object|embed|style|svg|math|base|meta|link)\b[^>]*>")
            .expect("valid regex")
    });
    static EVENT_HANDLER: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"(?i)[\s/]+on[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#).expect("valid regex")
    });
    static SCRIPT_URL: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"(?i)(href|src|action)\s*=\s*(["']?)\s*(javascript|vbscript|data:text/html)[^"'\s>]*"#)
            .expect("valid regex")
    });

    /// Remove script-bearing elements, event handler attributes and script URLs.
    pub fn sanitize(html: &str) -> String {
        let mut out = html.to_string();
        for block in DANGEROUS_BLOCKS.iter() {
            out = block.replace_all(&out, "").into_owned();
        }
        out = DANGEROUS_SINGLE.replace_all(&out, "").into_owned();
        out = EVENT_HANDLER.replace_all(&out, "").into_owned();
        SCRIPT_URL.replace_all(&out, "$1=$2#").into_owned()
    }

    /// Replace tags with `replacement`, leaving whitespace untouched.
    pub fn strip_tags_with(html: &str, replacement: &str) -> String {
        TAG.replace_all(html, replacement).into_owned()
    }

    /// Strip tags and collapse whitespace into single spaces.
    pub fn to_plain_text(html: &str) -> String {
        let stripped = strip_tags_with(html, " ");
        collapse_whitespace(&decode_entities(&stripped))
    }

    pub fn collapse_whitespace(text: &str) -> String {
        WHITESPACE.replace_all(text, " ").trim().to_string()
    }

    /// Decode the handful of entities that commonly survive in feed HTML.
    pub fn decode_entities(text: &str) -> String {
        if !text.contains('&') {
            return text.to_string();
        }
        text.replace("&nbsp;", " ")
            .replace("&#160;", " ")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&apos;", "'")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&hellip;", "\u{2026}")
            .replace("&amp;", "&")
    }

    /// Longest prefix of `text` with at most `max_bytes` bytes that ends on a char boundary.
    pub fn clamp(text: &str, max_bytes: usize) -> &str {
        if text.len() <= max_bytes {
            return text;
        }
        let mut end = max_bytes;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    }
}

/// URL utilities
pub mod url {
    use once_cell::sync::Lazy;
    use regex::Regex;
    use url::Url;

    static IMAGE_EXTENSION: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\.(jpg|jpeg|png|gif|webp)($|\?)").expect("valid regex"));

    /// True for absolute http(s) URLs with a host.
    pub fn is_http_url(url_str: &str) -> bool {
        match Url::parse(url_str.trim()) {
            Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
            Err(_) => false,
        }
    }

    /// Resolve `reference` against `base`, keeping the result only when it is http(s).
    pub fn resolve_against(base: &str, reference: &str) -> Option<String> {
        let joined = Url::parse(base.trim()).ok()?.join(reference).ok()?;
        is_http_url(joined.as_str()).then(|| joined.to_string())
    }

    pub fn has_image_extension(url_str: &str) -> bool {
        IMAGE_EXTENSION.is_match(url_str)
    }

    /// Normalize a user-supplied site URL: add a scheme when missing and drop one trailing slash.
    pub fn normalize_site_url(site: &str) -> String {
        let site = site.trim();
        let with_scheme = if site.starts_with("http://") || site.starts_with("https://") {
            site.to_string()
        } else {
            format!("https://{}", site)
        };
        with_scheme
            .strip_suffix('/')
            .map(str::to_string)
            .unwrap_or(with_scheme)
    }
}

/// Time utilities for feed dates
pub mod time {
    use chrono::{DateTime, NaiveDateTime, Utc};

    /// Parse an ISO 8601 / RFC 3339 timestamp.
    pub fn parse_iso_date(value: &str) -> Option<DateTime<Utc>> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    /// Parse the native date of a feed: RFC 2822 first, then a few formats seen in the wild.
    pub fn parse_feed_date(value: &str) -> Option<DateTime<Utc>> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
            return Some(dt.with_timezone(&Utc));
        }
        // Some feeds spell out the zone name chrono does not know, e.g. "CEST".
        if let Some((head, _zone)) = value.rsplit_once(' ') {
            if let Ok(naive) = NaiveDateTime::parse_from_str(head, "%a, %d %b %Y %H:%M:%S") {
                return Some(naive.and_utc());
            }
        }
        if let Some(dt) = parse_iso_date(value) {
            return Some(dt);
        }
        ["%Y-%m-%d %H:%M:%S", "%d %b %Y %H:%M:%S"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
            .map(|naive| naive.and_utc())
    }
}
