pub mod types;
pub mod rss_utils;
pub mod config;
pub mod traits;
pub mod feed_manager;
pub mod fetcher;
pub mod parser;
pub mod normalizer;
pub mod dedup;
pub mod state;
pub mod syncer;
pub mod queue;
pub mod aggregator;
pub mod scheduler;
pub mod maintenance;

pub use types::*;
pub use config::{SyncSchedule, SyncSettings};
pub use traits::{ArticleStore, FeedSource};
pub use feed_manager::FeedManager;
pub use fetcher::Fetcher;
pub use parser::{FeedKind, FeedParser, ParsedFeed};
pub use state::SyncLocks;
pub use syncer::SourceSyncer;
pub use queue::{QueueConfig, SyncQueue};
pub use aggregator::SyncService;
pub use scheduler::Scheduler;
