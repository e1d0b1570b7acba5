use crate::types::{
    Article, ArticleDraft, ArticleRepair, InsertOutcome, NewSource, RawItem, Result, Source,
};
use async_trait::async_trait;

/// Anything that can turn a feed URL into raw items (HTTP fetcher, test doubles, ...)
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch and parse the feed. An empty feed is `Ok(vec![])`, not an error.
    async fn fetch_feed(&self, url: &str) -> Result<Vec<RawItem>>;

    /// Feed URLs discovered for a site, in preference order. Sources that cannot probe return
    /// nothing.
    async fn detect_feed(&self, _site_url: &str) -> Vec<String> {
        Vec::new()
    }
}

/// The narrow storage contract the sync core depends on.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn find_article_by_url(&self, url: &str) -> Result<Option<Article>>;

    /// Insert every draft in one transaction. A URL collision yields `Duplicate` and any other
    /// failure yields `Failed` for that draft only; the rest of the batch still commits.
    async fn bulk_insert_articles(&self, drafts: &[ArticleDraft]) -> Result<Vec<InsertOutcome>>;

    /// Delete articles created more than `days` days ago; returns the number removed.
    async fn delete_articles_older_than(&self, days: i64, exclude_favorites: bool) -> Result<u64>;

    /// Stamp `last_sync` with now and overwrite `last_error` (cleared when `None`).
    async fn update_source_last_sync(&self, source_id: i64, error: Option<&str>) -> Result<()>;

    async fn find_sources_due_for_sync(&self, active_only: bool) -> Result<Vec<Source>>;

    /// Articles sharing a URL, grouped, newest first within each group.
    async fn find_duplicate_articles_by_url(&self, source_id: Option<i64>) -> Result<Vec<Vec<Article>>>;

    async fn find_source(&self, id: i64) -> Result<Option<Source>>;

    async fn list_sources(&self, active_only: bool) -> Result<Vec<Source>>;

    async fn insert_source(&self, source: &NewSource) -> Result<Source>;

    async fn delete_articles(&self, ids: &[i64]) -> Result<u64>;

    async fn list_articles(&self, source_id: Option<i64>, limit: i64) -> Result<Vec<Article>>;

    async fn apply_article_repair(&self, id: i64, repair: &ArticleRepair) -> Result<()>;
}
