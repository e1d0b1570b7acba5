use crate::config::SyncSettings;
use crate::maintenance;
use crate::normalizer::normalize;
use crate::queue::SyncQueue;
use crate::state::SyncLocks;
use crate::syncer::SourceSyncer;
use crate::traits::{ArticleStore, FeedSource};
use crate::types::{
    ArticleDraft, NewSource, PassReport, QueueStatus, RepairReport, Result, Source, SyncError,
    SyncProgress, SyncResult,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Resets the full-pass flag however the pass ends.
struct PassGuard(Arc<AtomicBool>);

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Entry point for everything outside the sync core: scheduler, CLI, API handlers.
///
/// One instance per process, built by the composition root and shared by cloning.
#[derive(Clone)]
pub struct SyncService {
    store: Arc<dyn ArticleStore>,
    feeds: Arc<dyn FeedSource>,
    syncer: SourceSyncer,
    queue: SyncQueue,
    retention_days: i64,
    pass_running: Arc<AtomicBool>,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        feeds: Arc<dyn FeedSource>,
        settings: &SyncSettings,
    ) -> Self {
        let syncer = SourceSyncer::new(feeds.clone(), store.clone(), SyncLocks::new())
            .with_max_articles_per_source(settings.max_articles_per_source);
        let queue = SyncQueue::new(syncer.clone(), settings.queue.clone());

        Self {
            store,
            feeds,
            syncer,
            queue,
            retention_days: settings.retention_days,
            pass_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &Arc<dyn ArticleStore> {
        &self.store
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Fire-and-forget full pass.
    pub fn sync_all_sources(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.run_full_pass().await {
                error!("Full sync pass failed: {}", e);
            }
        });
    }

    pub fn is_pass_running(&self) -> bool {
        self.pass_running.load(Ordering::Acquire)
    }

    /// Sync every due active source through the queue, then prune old articles.
    ///
    /// Returns `PassReport::Skipped` straight away if another pass is still running.
    pub async fn run_full_pass(&self) -> Result<PassReport> {
        if self
            .pass_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Sync already in progress, skipping this run");
            return Ok(PassReport::Skipped);
        }
        let _guard = PassGuard(self.pass_running.clone());

        info!("Starting scheduled sync of all sources");
        let sources = self.store.find_sources_due_for_sync(true).await?;
        let count = sources.len();
        self.queue.enqueue_all(sources).await;

        let pruned = self
            .store
            .delete_articles_older_than(self.retention_days, true)
            .await?;
        if pruned > 0 {
            info!(
                "Deleted {} articles older than {} days",
                pruned, self.retention_days
            );
        }

        info!("Full sync pass finished: {} sources", count);
        Ok(PassReport::Completed {
            sources: count,
            pruned,
        })
    }

    async fn require_source(&self, source_id: i64) -> Result<Source> {
        self.store
            .find_source(source_id)
            .await?
            .ok_or(SyncError::SourceNotFound { id: source_id })
    }

    /// Sync one source through the queue and wait for it. Sync failures come back as a
    /// `SyncResult` carrying the error; only an unknown source is an `Err`.
    pub async fn force_sync_one_source(&self, source_id: i64) -> Result<SyncResult> {
        let source = self.require_source(source_id).await?;
        Ok(match self.queue.enqueue_and_wait(source).await {
            Ok(result) => result,
            Err(message) => SyncResult::failed(message),
        })
    }

    /// Sync one source immediately, bypassing the queue. A source that is already syncing is
    /// rejected at once with "Sync already in progress".
    pub async fn sync_source_direct(&self, source_id: i64) -> Result<SyncResult> {
        let source = self.require_source(source_id).await?;
        Ok(match self.syncer.sync_source(&source).await {
            Ok(result) => result,
            Err(SyncError::SyncInProgress { .. }) => SyncResult::failed("Sync already in progress"),
            Err(e) => SyncResult::failed(e.to_string()),
        })
    }

    pub fn is_source_syncing(&self, source_id: i64) -> bool {
        self.syncer.locks().is_locked(source_id)
    }

    pub fn get_queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<Vec<SyncProgress>> {
        self.queue.subscribe()
    }

    pub fn pause_queue(&self) {
        self.queue.pause();
    }

    pub fn resume_queue(&self) {
        self.queue.resume();
    }

    pub fn clear_queue(&self) {
        self.queue.clear();
    }

    pub async fn cleanup_duplicates(&self, source_id: Option<i64>) -> Result<u64> {
        maintenance::cleanup_duplicates(self.store.as_ref(), source_id).await
    }

    pub async fn validate_and_repair_articles(&self, source_id: Option<i64>) -> Result<RepairReport> {
        maintenance::validate_and_repair_articles(self.store.as_ref(), source_id).await
    }

    /// Register a source. Without an explicit feed URL the site is probed for one; if nothing
    /// is found the source is still saved and its syncs report the missing feed URL.
    pub async fn add_source(&self, mut source: NewSource) -> Result<Source> {
        source.feed_url = source.feed_url.filter(|u| !u.trim().is_empty());
        source.validate()?;

        if source.feed_url.is_none() {
            match self.feeds.detect_feed(&source.url).await.into_iter().next() {
                Some(feed_url) => {
                    info!("Using detected feed {} for {}", feed_url, source.url);
                    source.feed_url = Some(feed_url);
                }
                None => warn!("No feed found for {}; saving source without one", source.url),
            }
        }

        self.store.insert_source(&source).await
    }

    pub async fn list_sources(&self, active_only: bool) -> Result<Vec<Source>> {
        self.store.list_sources(active_only).await
    }

    /// Fetch a feed and normalize up to `limit` items without storing anything.
    pub async fn test_feed(&self, url: &str, limit: usize) -> Result<Vec<ArticleDraft>> {
        let items = self.feeds.fetch_feed(url).await?;
        Ok(items
            .iter()
            .filter_map(|item| normalize(item, 0).ok())
            .take(limit)
            .collect())
    }
}
