use anyhow::Context;
use clap::{Parser, Subcommand};
use panoptique_sync::{
    FeedManager, Fetcher, NewSource, PassReport, Scheduler, SyncService, SyncSettings,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "panoptique-sync", about = "Feed synchronization for the Panoptique reader")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C
    Serve,
    /// Run one full sync pass now
    Sync,
    /// Sync a single source through the queue
    SyncSource { id: i64 },
    /// Register a new source
    AddSource {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        feed_url: Option<String>,
        /// Minutes between syncs (5-1440)
        #[arg(long, default_value_t = 30)]
        frequency: i64,
    },
    /// Probe a site for feed URLs
    Detect { site_url: String },
    /// Delete duplicate articles, keeping the newest of each URL
    CleanupDuplicates {
        #[arg(long)]
        source: Option<i64>,
    },
    /// Backfill excerpts/descriptions and drop invalid image URLs
    Repair {
        #[arg(long)]
        source: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = SyncSettings::from_env().context("reading configuration")?;

    let store = Arc::new(
        FeedManager::new(&settings.database_url)
            .await
            .with_context(|| format!("opening database {}", settings.database_url))?,
    );
    let fetcher = Arc::new(Fetcher::new(settings.fetch.clone()).context("building HTTP client")?);
    let service = SyncService::new(store, fetcher.clone(), &settings);

    match cli.command {
        Command::Serve => {
            let mut scheduler = Scheduler::new(service.clone(), &settings);
            scheduler.start().await?;
            info!("Sync service running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            scheduler.stop().await?;
            info!("Shutting down");
        }
        Command::Sync => match service.run_full_pass().await? {
            PassReport::Skipped => info!("A sync pass is already running"),
            PassReport::Completed { sources, pruned } => {
                println!("Synced {} sources, pruned {} old articles", sources, pruned)
            }
        },
        Command::SyncSource { id } => {
            let result = service.force_sync_one_source(id).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            for e in &result.errors {
                error!("{}", e);
            }
        }
        Command::AddSource {
            name,
            url,
            feed_url,
            frequency,
        } => {
            let mut new_source = NewSource::new(name, url).with_frequency(frequency);
            if let Some(feed_url) = feed_url {
                new_source = new_source.with_feed_url(feed_url);
            }
            let source = service.add_source(new_source).await?;
            println!("{}", serde_json::to_string_pretty(&source)?);
        }
        Command::Detect { site_url } => {
            let feeds = fetcher.probe_feeds(&site_url).await;
            if feeds.is_empty() {
                println!("No feed found for {}", site_url);
            }
            for feed in feeds {
                println!("{}", feed);
            }
        }
        Command::CleanupDuplicates { source } => {
            let deleted = service.cleanup_duplicates(source).await?;
            println!("Deleted {} duplicate articles", deleted);
        }
        Command::Repair { source } => {
            let report = service.validate_and_repair_articles(source).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
