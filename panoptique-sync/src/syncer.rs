use crate::dedup::persist_new;
use crate::normalizer::normalize;
use crate::state::SyncLocks;
use crate::traits::{ArticleStore, FeedSource};
use crate::types::{Result, Source, SyncError, SyncResult};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_ARTICLES_PER_SOURCE: usize = 100;

/// Runs fetch, normalize and persist for one source at a time.
#[derive(Clone)]
pub struct SourceSyncer {
    feeds: Arc<dyn FeedSource>,
    store: Arc<dyn ArticleStore>,
    locks: SyncLocks,
    max_articles_per_source: usize,
}

impl SourceSyncer {
    pub fn new(feeds: Arc<dyn FeedSource>, store: Arc<dyn ArticleStore>, locks: SyncLocks) -> Self {
        Self {
            feeds,
            store,
            locks,
            max_articles_per_source: DEFAULT_MAX_ARTICLES_PER_SOURCE,
        }
    }

    /// Advisory only: larger feeds are logged, never truncated.
    pub fn with_max_articles_per_source(mut self, max: usize) -> Self {
        self.max_articles_per_source = max;
        self
    }

    pub fn locks(&self) -> &SyncLocks {
        &self.locks
    }

    pub fn store(&self) -> &Arc<dyn ArticleStore> {
        &self.store
    }

    pub fn feeds(&self) -> &Arc<dyn FeedSource> {
        &self.feeds
    }

    /// Sync one source.
    ///
    /// Returns `SyncInProgress` without touching the source when another sync holds it.
    /// Every other attempt is recorded on the source record: `Ok` carries item-level errors
    /// (the first one becomes `last_error`), `Err` means the whole attempt failed and its
    /// message was recorded.
    pub async fn sync_source(&self, source: &Source) -> Result<SyncResult> {
        let _guard = self
            .locks
            .try_acquire(source.id)
            .ok_or(SyncError::SyncInProgress { source_id: source.id })?;

        match self.run(source).await {
            Ok(result) => {
                self.store
                    .update_source_last_sync(source.id, result.errors.first().map(String::as_str))
                    .await?;
                info!(
                    "Completed sync for {}: {} found, {} new, {} errors",
                    source.name,
                    result.found,
                    result.new,
                    result.errors.len()
                );
                Ok(result)
            }
            Err(e) => {
                error!("Failed to sync {}: {}", source.name, e);
                if let Err(record_err) = self
                    .store
                    .update_source_last_sync(source.id, Some(&e.to_string()))
                    .await
                {
                    warn!("Could not record sync failure for {}: {}", source.name, record_err);
                }
                Err(e)
            }
        }
    }

    async fn run(&self, source: &Source) -> Result<SyncResult> {
        let feed_url = source
            .feed_url()
            .ok_or(SyncError::MissingFeedUrl { source_id: source.id })?;

        info!("Starting sync for source: {} ({})", source.name, feed_url);
        let items = self.feeds.fetch_feed(feed_url).await?;

        if items.len() > self.max_articles_per_source {
            warn!(
                "Feed for {} returned {} items, above the advisory maximum of {}",
                source.name,
                items.len(),
                self.max_articles_per_source
            );
        }

        let mut result = SyncResult::default();
        let mut drafts = Vec::with_capacity(items.len());
        for item in &items {
            match normalize(item, source.id) {
                Ok(draft) => drafts.push(draft),
                Err(message) => result.errors.push(message),
            }
        }
        result.found = drafts.len();

        debug!(
            "Processed {} items from {}: {} with URL, {} skipped",
            items.len(),
            source.name,
            drafts.len(),
            result.errors.len()
        );

        let summary = persist_new(self.store.as_ref(), &drafts).await?;
        result.new = summary.inserted;
        result.errors.extend(summary.failures);
        Ok(result)
    }
}
