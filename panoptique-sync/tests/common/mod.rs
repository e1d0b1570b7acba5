#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use panoptique_sync::{
    ArticleStore, FeedManager, FeedParser, FeedSource, NewSource, QueueConfig, RawItem, Result,
    Source, SyncError, SyncService, SyncSettings,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const RSS_TWO_ITEMS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Example</title>
    <item>
      <title>First</title>
      <link>https://example.com/posts/1</link>
      <description>&lt;p&gt;The first post has a long enough paragraph.&lt;/p&gt;</description>
      <media:thumbnail url="https://example.com/1.jpg"/>
    </item>
    <item>
      <title>Second</title>
      <link>https://example.com/posts/2</link>
      <description>Second post body</description>
    </item>
  </channel>
</rss>"#;

pub const RSS_EMPTY: &str =
    r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Quiet</title></channel></rss>"#;

pub fn item(link: &str) -> RawItem {
    RawItem {
        title: Some(format!("Post at {}", link)),
        link: Some(link.to_string()),
        content: Some("<p>Some body text that is long enough to excerpt.</p>".to_string()),
        ..Default::default()
    }
}

#[derive(Clone)]
pub enum Script {
    Items(Vec<RawItem>),
    Fail(String),
    Malformed,
    Panic,
}

/// Feed source double: scripted responses per URL, an optional gate that holds every fetch,
/// and a high-water mark of concurrent fetches.
#[derive(Default)]
pub struct ScriptedFeeds {
    scripts: Mutex<HashMap<String, Script>>,
    delay: Duration,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn script(&self, url: &str, script: Script) {
        self.scripts.lock().unwrap().insert(url.to_string(), script);
    }

    pub fn close_gate(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn open_gate(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSource for ScriptedFeeds {
    async fn fetch_feed(&self, url: &str) -> Result<Vec<RawItem>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(url.to_string());

        while self.closed.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let script = self.scripts.lock().unwrap().get(url).cloned();
        match script {
            Some(Script::Items(items)) => Ok(items),
            Some(Script::Fail(message)) => Err(SyncError::FeedFetch {
                url: url.to_string(),
                message,
            }),
            Some(Script::Malformed) => {
                FeedParser::parse_feed("<rss><channel><item><title>cut").map(|feed| feed.items)
            }
            Some(Script::Panic) => panic!("scripted panic for {}", url),
            None => Ok(vec![item(&format!("{}/post", url))]),
        }
    }
}

pub fn test_settings() -> SyncSettings {
    SyncSettings {
        queue: QueueConfig {
            concurrency: 3,
            progress_tick: Duration::from_millis(10),
            completed_ttl: Duration::from_millis(100),
            failed_ttl: Duration::from_millis(200),
        },
        ..SyncSettings::default()
    }
}

pub fn feed_url(n: usize) -> String {
    format!("https://feeds.test/{}", n)
}

/// In-memory store with `count` sources whose feed URLs are `feed_url(0..count)`.
pub async fn store_with_sources(count: usize) -> (Arc<FeedManager>, Vec<Source>) {
    let store = Arc::new(FeedManager::in_memory().await.expect("in-memory store"));
    let mut sources = Vec::new();
    for n in 0..count {
        let source = store
            .insert_source(
                &NewSource::new(format!("Source {}", n), format!("https://site{}.test", n))
                    .with_feed_url(feed_url(n)),
            )
            .await
            .expect("insert source");
        sources.push(source);
    }
    (store, sources)
}

pub fn service(store: Arc<FeedManager>, feeds: Arc<ScriptedFeeds>) -> SyncService {
    SyncService::new(store, feeds, &test_settings())
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Async flavour of [`wait_until`].
pub async fn wait_until_async<F, Fut>(what: &str, check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Insert a row directly, bypassing the gate, to stage legacy or aged data.
pub async fn insert_raw_article(
    store: &FeedManager,
    source_id: i64,
    url: &str,
    created_at: DateTime<Utc>,
) -> i64 {
    let result = sqlx::query(
        "INSERT INTO articles (source_id, title, url, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(source_id)
    .bind("Staged")
    .bind(url)
    .bind(created_at)
    .bind(created_at)
    .execute(store.pool())
    .await
    .expect("insert raw article");
    result.last_insert_rowid()
}
