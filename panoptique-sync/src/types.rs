use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_SYNC_FREQUENCY_MINUTES: i64 = 5;
pub const MAX_SYNC_FREQUENCY_MINUTES: i64 = 1440;

/// A feed subscription.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub feed_url: Option<String>,
    pub category_id: Option<i64>,
    pub is_active: bool,
    /// Minutes between scheduled syncs, within [5, 1440].
    pub sync_frequency: i64,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    /// A source is due when it was never synced or its frequency window has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_sync {
            None => true,
            Some(last) => last + Duration::minutes(self.sync_frequency) <= now,
        }
    }

    pub fn feed_url(&self) -> Option<&str> {
        self.feed_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

/// Input for registering a new source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSource {
    pub name: String,
    pub url: String,
    pub feed_url: Option<String>,
    pub category_id: Option<i64>,
    pub sync_frequency: i64,
}

impl NewSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            feed_url: None,
            category_id: None,
            sync_frequency: 30,
        }
    }

    pub fn with_feed_url(mut self, feed_url: impl Into<String>) -> Self {
        self.feed_url = Some(feed_url.into());
        self
    }

    pub fn with_frequency(mut self, minutes: i64) -> Self {
        self.sync_frequency = minutes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SyncError::InvalidSource("name must not be empty".to_string()));
        }
        if !crate::rss_utils::url::is_http_url(&self.url) {
            return Err(SyncError::InvalidSource(format!(
                "site URL must be http(s): {}",
                self.url
            )));
        }
        if let Some(feed_url) = &self.feed_url {
            if !crate::rss_utils::url::is_http_url(feed_url) {
                return Err(SyncError::InvalidSource(format!(
                    "feed URL must be http(s): {}",
                    feed_url
                )));
            }
        }
        if !(MIN_SYNC_FREQUENCY_MINUTES..=MAX_SYNC_FREQUENCY_MINUTES).contains(&self.sync_frequency) {
            return Err(SyncError::InvalidSource(format!(
                "sync frequency must be between {} and {} minutes, got {}",
                MIN_SYNC_FREQUENCY_MINUTES, MAX_SYNC_FREQUENCY_MINUTES, self.sync_frequency
            )));
        }
        Ok(())
    }
}

/// A stored article.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub source_id: i64,
    pub title: String,
    pub url: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub excerpt: Option<String>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub is_favorite: bool,
    pub is_archived: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub favorited_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A normalized, not yet persisted article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleDraft {
    pub source_id: i64,
    pub title: String,
    pub url: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub excerpt: Option<String>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub is_favorite: bool,
    pub is_archived: bool,
}

/// Partial update produced by the repair pass. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleRepair {
    pub excerpt: Option<String>,
    pub description: Option<String>,
    pub clear_image_url: bool,
}

impl ArticleRepair {
    pub fn is_empty(&self) -> bool {
        self.excerpt.is_none() && self.description.is_none() && !self.clear_image_url
    }
}

/// Outcome of one insert inside a bulk insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
    Failed(String),
}

/// One `media:content` element of a raw item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMedia {
    pub url: Option<String>,
    pub medium: Option<String>,
    pub mime: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEnclosure {
    pub url: Option<String>,
    pub mime: Option<String>,
}

/// One feed item as found in the XML. Every field is optional because feeds disagree on
/// which ones they supply and how they name them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub guid: Option<String>,
    /// Native publish date string (`pubDate`).
    pub pub_date: Option<String>,
    /// ISO 8601 date (`published`, `updated`, `dc:date`).
    pub iso_date: Option<String>,
    /// Item body: RSS `description` or Atom `content`.
    pub content: Option<String>,
    pub content_encoded: Option<String>,
    /// Atom `summary`.
    pub summary: Option<String>,
    /// `dc:creator`.
    pub creator: Option<String>,
    pub author: Option<String>,
    pub enclosure: Option<RawEnclosure>,
    pub media_thumbnails: Vec<String>,
    pub media_contents: Vec<RawMedia>,
}

/// Result of syncing one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub found: usize,
    pub new: usize,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            found: 0,
            new: 0,
            errors: vec![message.into()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Failed)
    }
}

/// Live, unpersisted progress of one source in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub source_id: i64,
    pub source_name: String,
    pub status: SyncStatus,
    /// Estimate in 0..=100.
    pub progress: u8,
    pub articles_found: Option<usize>,
    pub articles_new: Option<usize>,
    pub error: Option<String>,
}

impl SyncProgress {
    pub fn pending(source: &Source) -> Self {
        Self {
            source_id: source.id,
            source_name: source.name.clone(),
            status: SyncStatus::Pending,
            progress: 0,
            articles_found: None,
            articles_new: None,
            error: None,
        }
    }
}

/// Point-in-time snapshot of the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub backlog_size: usize,
    /// Backlogged plus in-flight units.
    pub pending_count: usize,
    pub is_paused: bool,
    pub progress: Vec<SyncProgress>,
}

/// Outcome of a full sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassReport {
    /// Another pass was already running.
    Skipped,
    Completed { sources: usize, pruned: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub repaired_count: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "News Aggregator/1.0".to_string(),
            timeout_seconds: 15,
            max_feed_size_mb: 10,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Failed to fetch feed {url}: {message}")]
    FeedFetch { url: String, message: String },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Source {source_id} has no feed URL. Add a feed URL to this source.")]
    MissingFeedUrl { source_id: i64 },

    #[error("Sync already in progress for source {source_id}")]
    SyncInProgress { source_id: i64 },

    #[error("Source not found: {id}")]
    SourceNotFound { id: i64 },

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
