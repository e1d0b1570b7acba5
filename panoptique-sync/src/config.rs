use crate::queue::QueueConfig;
use crate::syncer::DEFAULT_MAX_ARTICLES_PER_SOURCE;
use crate::types::{FetchConfig, Result, SyncError};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://panoptique.db?mode=rwc";
/// Every 30 minutes, seconds-first.
pub const DEFAULT_SYNC_CRON: &str = "0 */30 * * * *";
pub const DEFAULT_RETENTION_DAYS: i64 = 15;

/// When the scheduler fires a full pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSchedule {
    /// Six-field cron expression (seconds first).
    Cron(String),
    Every(Duration),
}

impl Default for SyncSchedule {
    fn default() -> Self {
        SyncSchedule::Cron(DEFAULT_SYNC_CRON.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub database_url: String,
    pub schedule: SyncSchedule,
    pub retention_days: i64,
    pub max_articles_per_source: usize,
    pub sync_on_startup: bool,
    pub startup_delay: Duration,
    pub fetch: FetchConfig,
    pub queue: QueueConfig,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            schedule: SyncSchedule::default(),
            retention_days: DEFAULT_RETENTION_DAYS,
            max_articles_per_source: DEFAULT_MAX_ARTICLES_PER_SOURCE,
            sync_on_startup: true,
            startup_delay: Duration::from_secs(10),
            fetch: FetchConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl SyncSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read settings through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut settings = Self::default();

        if let Some(url) = get("DATABASE_URL") {
            settings.database_url = url;
        }

        if let Some(minutes) = get("SYNC_INTERVAL_MINUTES") {
            let minutes: u64 = parse("SYNC_INTERVAL_MINUTES", &minutes)?;
            if minutes == 0 {
                return Err(SyncError::Config("SYNC_INTERVAL_MINUTES must be positive".to_string()));
            }
            settings.schedule = SyncSchedule::Every(Duration::from_secs(minutes * 60));
        } else if let Some(cron) = get("SYNC_CRON") {
            settings.schedule = SyncSchedule::Cron(normalize_cron(&cron)?);
        }

        if let Some(days) = get("ARTICLES_RETENTION_DAYS") {
            settings.retention_days = parse("ARTICLES_RETENTION_DAYS", &days)?;
            if settings.retention_days < 1 {
                return Err(SyncError::Config(
                    "ARTICLES_RETENTION_DAYS must be at least 1".to_string(),
                ));
            }
        }
        if let Some(max) = get("MAX_ARTICLES_PER_SOURCE") {
            settings.max_articles_per_source = parse("MAX_ARTICLES_PER_SOURCE", &max)?;
        }
        if let Some(flag) = get("SYNC_ON_STARTUP") {
            settings.sync_on_startup = parse_bool("SYNC_ON_STARTUP", &flag)?;
        }
        if let Some(secs) = get("SYNC_STARTUP_DELAY_SECS") {
            settings.startup_delay = Duration::from_secs(parse("SYNC_STARTUP_DELAY_SECS", &secs)?);
        }
        if let Some(concurrency) = get("SYNC_CONCURRENCY") {
            settings.queue.concurrency = parse("SYNC_CONCURRENCY", &concurrency)?;
            if settings.queue.concurrency == 0 {
                return Err(SyncError::Config("SYNC_CONCURRENCY must be positive".to_string()));
            }
        }
        if let Some(secs) = get("FEED_TIMEOUT_SECS") {
            settings.fetch.timeout_seconds = parse("FEED_TIMEOUT_SECS", &secs)?;
        }
        if let Some(agent) = get("FEED_USER_AGENT") {
            settings.fetch.user_agent = agent;
        }
        if let Some(mb) = get("FEED_MAX_SIZE_MB") {
            settings.fetch.max_feed_size_mb = parse("FEED_MAX_SIZE_MB", &mb)?;
        }

        Ok(settings)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| SyncError::Config(format!("{} has an invalid value: {:?}", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SyncError::Config(format!("{} must be a boolean, got {:?}", key, value))),
    }
}

/// Accept a classic five-field cron expression or a six-field one with seconds, and return the
/// six-field form.
pub fn normalize_cron(expr: &str) -> Result<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        n => Err(SyncError::Config(format!(
            "cron expression {:?} has {} fields, expected 5 or 6",
            expr, n
        ))),
    }
}
