use crate::aggregator::SyncService;
use crate::config::{SyncSchedule, SyncSettings};
use crate::types::{PassReport, Result};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Triggers full sync passes on a timer and once shortly after start.
pub struct Scheduler {
    service: SyncService,
    schedule: SyncSchedule,
    sync_on_startup: bool,
    startup_delay: Duration,
    jobs: Option<JobScheduler>,
    startup_task: Option<JoinHandle<()>>,
}

async fn scheduled_pass(service: SyncService) {
    match service.run_full_pass().await {
        Ok(PassReport::Skipped) => {}
        Ok(PassReport::Completed { sources, pruned }) => {
            info!("Scheduled sync completed: {} sources, {} pruned", sources, pruned)
        }
        Err(e) => error!("Scheduled sync failed: {}", e),
    }
}

impl Scheduler {
    pub fn new(service: SyncService, settings: &SyncSettings) -> Self {
        Self {
            service,
            schedule: settings.schedule.clone(),
            sync_on_startup: settings.sync_on_startup,
            startup_delay: settings.startup_delay,
            jobs: None,
            startup_task: None,
        }
    }

    pub fn schedule(&self) -> &SyncSchedule {
        &self.schedule
    }

    pub fn is_running(&self) -> bool {
        self.jobs.is_some()
    }

    /// Start the timer and, when enabled, the delayed startup pass.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            info!("Scheduler already running");
            return Ok(());
        }
        self.start_timer().await?;

        if self.sync_on_startup {
            let service = self.service.clone();
            let delay = self.startup_delay;
            info!("Initial sync in {:?}", delay);
            self.startup_task = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                info!("Running initial sync");
                scheduled_pass(service).await;
            }));
        }
        Ok(())
    }

    async fn start_timer(&mut self) -> Result<()> {
        let jobs = JobScheduler::new().await?;
        let service = self.service.clone();

        let job = match &self.schedule {
            SyncSchedule::Cron(expr) => Job::new_async(expr.as_str(), move |_uuid, _lock| {
                let service = service.clone();
                Box::pin(async move { scheduled_pass(service).await })
            })?,
            SyncSchedule::Every(period) => Job::new_repeated_async(*period, move |_uuid, _lock| {
                let service = service.clone();
                Box::pin(async move { scheduled_pass(service).await })
            })?,
        };

        jobs.add(job).await?;
        jobs.start().await?;
        self.jobs = Some(jobs);
        info!("Sync scheduler started with {:?}", self.schedule);
        Ok(())
    }

    /// Stop triggering passes. A pass already running is left to finish.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.startup_task.take() {
            task.abort();
        }
        if let Some(mut jobs) = self.jobs.take() {
            jobs.shutdown().await?;
            info!("Sync scheduler stopped");
        }
        Ok(())
    }

    /// Swap the timer for a new schedule without re-running the startup pass.
    pub async fn restart(&mut self, schedule: SyncSchedule) -> Result<()> {
        if let Some(mut jobs) = self.jobs.take() {
            jobs.shutdown().await?;
        }
        self.schedule = schedule;
        self.start_timer().await
    }
}
