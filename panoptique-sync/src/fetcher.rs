use crate::parser::{FeedParser, ParsedFeed};
use crate::rss_utils::url::normalize_site_url;
use crate::traits::FeedSource;
use crate::types::{FetchConfig, RawItem, Result, SyncError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The `charset` parameter of a Content-Type value.
fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
            .filter(|v| !v.is_empty())
    })
}

/// Conventional feed locations probed by [`Fetcher::probe_feeds`], in probe order.
pub const FEED_PROBE_PATHS: &[&str] = &[
    "/rss",
    "/feed",
    "/rss.xml",
    "/feed.xml",
    "/feeds/posts/default",
    "/index.xml",
    "/atom.xml",
    "/?feed=rss2",
    "/?feed=rss",
    "/?feed=atom",
];

pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    fn fetch_error(url: &str, message: impl Into<String>) -> SyncError {
        SyncError::FeedFetch {
            url: url.to_string(),
            message: message.into(),
        }
    }

    /// GET the feed body. Network errors, timeouts, non-2xx statuses and oversized bodies are
    /// all reported as `FeedFetch`.
    pub async fn fetch_body(&self, url: &str) -> Result<String> {
        debug!("Fetching feed: {}", url);

        let response = self
            .client
            .get(url)
            .header(
                reqwest::header::ACCEPT,
                "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.5",
            )
            .send()
            .await
            .map_err(|e| Self::fetch_error(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::fetch_error(
                url,
                format!("HTTP {}: {}", status.as_u16(), status.canonical_reason().unwrap_or("Unknown")),
            ));
        }

        let max_bytes = self.config.max_feed_size_mb * 1024 * 1024;
        if let Some(content_length) = response.content_length() {
            if content_length as usize > max_bytes {
                return Err(Self::fetch_error(
                    url,
                    format!("Feed too large: {} bytes", content_length),
                ));
            }
        }

        let charset = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(charset_param)
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::fetch_error(url, e.to_string()))?;
        if bytes.len() > max_bytes {
            return Err(Self::fetch_error(url, format!("Feed too large: {} bytes", bytes.len())));
        }

        info!("Fetched feed: {} ({} bytes)", url, bytes.len());
        Ok(FeedParser::decode(&bytes, charset.as_deref()))
    }

    /// Fetch and parse, keeping the feed-level metadata.
    pub async fn fetch_parsed(&self, url: &str) -> Result<ParsedFeed> {
        let body = self.fetch_body(url).await?;
        FeedParser::parse_feed(&body).map_err(|e| Self::fetch_error(url, e.to_string()))
    }

    /// True when the URL fetches, parses and yields at least one item.
    pub async fn validate_feed(&self, url: &str) -> bool {
        match self.fetch_parsed(url).await {
            Ok(feed) => !feed.items.is_empty(),
            Err(e) => {
                debug!("Feed validation failed for {}: {}", url, e);
                false
            }
        }
    }

    /// Probe the conventional feed paths of a site and return the ones that validate.
    pub async fn probe_feeds(&self, site_url: &str) -> Vec<String> {
        let base = normalize_site_url(site_url);
        let mut found = Vec::new();

        for path in FEED_PROBE_PATHS {
            let candidate = format!("{}{}", base, path);
            if self.validate_feed(&candidate).await {
                info!("Detected feed at {}", candidate);
                found.push(candidate);
            }
        }

        if found.is_empty() {
            warn!("No feed detected for {}", site_url);
        }
        found
    }
}

#[async_trait]
impl FeedSource for Fetcher {
    async fn fetch_feed(&self, url: &str) -> Result<Vec<RawItem>> {
        Ok(self.fetch_parsed(url).await?.items)
    }

    async fn detect_feed(&self, site_url: &str) -> Vec<String> {
        self.probe_feeds(site_url).await
    }
}
