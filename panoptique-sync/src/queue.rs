use crate::syncer::SourceSyncer;
use crate::types::{QueueStatus, Source, SyncProgress, SyncResult, SyncStatus};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Notify};
use tracing::{debug, error, info, warn};

/// How a queued sync ended, as seen by someone waiting on it.
pub type UnitOutcome = std::result::Result<SyncResult, String>;

pub const CANCELLED: &str = "sync cancelled";

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Units allowed in flight at once.
    pub concurrency: usize,
    /// Interval of the simulated progress climb.
    pub progress_tick: Duration,
    pub completed_ttl: Duration,
    pub failed_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            progress_tick: Duration::from_millis(500),
            completed_ttl: Duration::from_secs(5),
            failed_ttl: Duration::from_secs(10),
        }
    }
}

struct ProgressEntry {
    /// Bumped on every terminal transition so stale removal timers can be told apart.
    seq: u64,
    progress: SyncProgress,
}

#[derive(Default)]
struct QueueState {
    backlog: VecDeque<Source>,
    progress: Vec<ProgressEntry>,
    /// Sources with a unit in flight.
    running: HashSet<i64>,
    paused: bool,
    next_seq: u64,
    waiters: HashMap<i64, Vec<oneshot::Sender<UnitOutcome>>>,
}

impl QueueState {
    fn upsert(&mut self, progress: SyncProgress) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        match self
            .progress
            .iter_mut()
            .find(|e| e.progress.source_id == progress.source_id)
        {
            Some(entry) => {
                entry.seq = seq;
                entry.progress = progress;
            }
            None => self.progress.push(ProgressEntry { seq, progress }),
        }
        seq
    }

    fn entry_mut(&mut self, source_id: i64) -> Option<&mut SyncProgress> {
        self.progress
            .iter_mut()
            .find(|e| e.progress.source_id == source_id)
            .map(|e| &mut e.progress)
    }

    /// Queue `source` unless it is already queued or in flight; waiters registered for it
    /// are then resolved by the existing unit.
    fn push_backlog(&mut self, source: Source) {
        if self.running.contains(&source.id)
            || self.backlog.iter().any(|queued| queued.id == source.id)
        {
            return;
        }
        self.upsert(SyncProgress::pending(&source));
        self.backlog.push_back(source);
    }

    /// Drop the backlog; anyone waiting on a dropped source is told it was cancelled.
    fn drain_backlog(&mut self) {
        for source in self.backlog.drain(..) {
            if let Some(waiters) = self.waiters.remove(&source.id) {
                for waiter in waiters {
                    let _ = waiter.send(Err(CANCELLED.to_string()));
                }
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.backlog.is_empty() && self.running.is_empty()
    }

    fn snapshot(&self) -> Vec<SyncProgress> {
        self.progress.iter().map(|e| e.progress.clone()).collect()
    }
}

struct QueueInner {
    syncer: SourceSyncer,
    config: QueueConfig,
    state: Mutex<QueueState>,
    idle: Notify,
    events: broadcast::Sender<Vec<SyncProgress>>,
}

/// Bounded-concurrency FIFO of source syncs with live progress.
///
/// Cheap to clone; all clones drive the same queue.
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<QueueInner>,
}

impl SyncQueue {
    pub fn new(syncer: SourceSyncer, config: QueueConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        let config = QueueConfig {
            concurrency: config.concurrency.max(1),
            ..config
        };
        Self {
            inner: Arc::new(QueueInner {
                syncer,
                config,
                state: Mutex::new(QueueState::default()),
                idle: Notify::new(),
                events,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self) {
        let snapshot = self.state().snapshot();
        // No subscribers is fine.
        let _ = self.inner.events.send(snapshot);
    }

    /// Receive the full progress list every time it changes.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<SyncProgress>> {
        self.inner.events.subscribe()
    }

    pub fn syncer(&self) -> &SourceSyncer {
        &self.inner.syncer
    }

    /// Add one source to the back of the backlog.
    pub fn enqueue(&self, source: Source) {
        debug!("Queueing sync for source {}", source.name);
        self.state().push_backlog(source);
        self.emit();
        self.pump();
    }

    /// Enqueue one source and wait until its unit reaches a terminal state.
    pub async fn enqueue_and_wait(&self, source: Source) -> UnitOutcome {
        let (tx, rx) = oneshot::channel();
        self.state().waiters.entry(source.id).or_default().push(tx);
        self.enqueue(source);
        rx.await.unwrap_or_else(|_| Err(CANCELLED.to_string()))
    }

    /// Start a fresh pass: replace the backlog and progress with `sources`, then wait until
    /// the backlog is empty and nothing is in flight.
    pub async fn enqueue_all(&self, sources: Vec<Source>) {
        info!("Queueing sync for {} sources", sources.len());
        {
            let mut state = self.state();
            state.drain_backlog();
            state.progress.clear();
            for source in sources {
                state.push_backlog(source);
            }
        }
        self.emit();
        self.pump();
        self.wait_idle().await;
        info!("All sources sync completed");
    }

    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state().is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub fn pause(&self) {
        self.state().paused = true;
        info!("Sync queue paused");
        self.emit();
    }

    pub fn resume(&self) {
        self.state().paused = false;
        info!("Sync queue resumed");
        self.emit();
        self.pump();
    }

    /// Drop the backlog and every progress entry. In-flight units keep running.
    pub fn clear(&self) {
        let idle = {
            let mut state = self.state();
            state.drain_backlog();
            state.progress.clear();
            state.is_idle()
        };
        info!("Sync queue cleared");
        self.emit();
        if idle {
            self.inner.idle.notify_waiters();
        }
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.state();
        QueueStatus {
            backlog_size: state.backlog.len(),
            pending_count: state.backlog.len() + state.running.len(),
            is_paused: state.paused,
            progress: state.snapshot(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state().is_idle()
    }

    /// Start units from the backlog until the concurrency budget is spent.
    fn pump(&self) {
        loop {
            let source = {
                let mut state = self.state();
                if state.paused || state.running.len() >= self.inner.config.concurrency {
                    return;
                }
                let Some(source) = state.backlog.pop_front() else {
                    return;
                };
                state.running.insert(source.id);
                state.upsert(SyncProgress {
                    status: SyncStatus::Syncing,
                    progress: 10,
                    ..SyncProgress::pending(&source)
                });
                source
            };
            self.emit();

            let queue = self.clone();
            tokio::spawn(async move { queue.run_unit(source).await });
        }
    }

    async fn run_unit(self, source: Source) {
        let syncer = self.inner.syncer.clone();
        let unit_source = source.clone();
        let mut handle = tokio::spawn(async move { syncer.sync_source(&unit_source).await });

        let mut ticker = tokio::time::interval(self.inner.config.progress_tick);
        ticker.tick().await;
        let joined = loop {
            tokio::select! {
                joined = &mut handle => break joined,
                _ = ticker.tick() => self.bump_progress(source.id),
            }
        };

        let outcome = match joined {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e.to_string()),
            Err(join_err) => {
                let message = format!("Sync task for {} aborted: {}", source.name, join_err);
                error!("{}", message);
                if let Err(e) = self
                    .inner
                    .syncer
                    .store()
                    .update_source_last_sync(source.id, Some(&message))
                    .await
                {
                    warn!("Could not record sync failure for {}: {}", source.name, e);
                }
                Err(message)
            }
        };

        self.finish(&source, outcome);
    }

    fn bump_progress(&self, source_id: i64) {
        let bumped = {
            let mut state = self.state();
            match state.entry_mut(source_id) {
                Some(entry) if entry.status == SyncStatus::Syncing && entry.progress < 90 => {
                    entry.progress = (entry.progress + 10).min(90);
                    true
                }
                _ => false,
            }
        };
        if bumped {
            self.emit();
        }
    }

    fn finish(&self, source: &Source, outcome: UnitOutcome) {
        let (terminal, ttl) = match &outcome {
            Ok(result) => (
                SyncProgress {
                    status: SyncStatus::Completed,
                    progress: 100,
                    articles_found: Some(result.found),
                    articles_new: Some(result.new),
                    ..SyncProgress::pending(source)
                },
                self.inner.config.completed_ttl,
            ),
            Err(message) => (
                SyncProgress {
                    status: SyncStatus::Failed,
                    progress: 0,
                    error: Some(message.clone()),
                    ..SyncProgress::pending(source)
                },
                self.inner.config.failed_ttl,
            ),
        };

        let (seq, waiters, idle) = {
            let mut state = self.state();
            state.running.remove(&source.id);
            let seq = state.upsert(terminal);
            let waiters = state.waiters.remove(&source.id).unwrap_or_default();
            (seq, waiters, state.is_idle())
        };

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        self.emit();
        self.schedule_removal(source.id, seq, ttl);

        if idle {
            self.inner.idle.notify_waiters();
        } else {
            self.pump();
        }
    }

    fn schedule_removal(&self, source_id: i64, seq: u64, ttl: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let removed = {
                let mut state = queue.state();
                let before = state.progress.len();
                state
                    .progress
                    .retain(|e| !(e.progress.source_id == source_id && e.seq == seq));
                state.progress.len() != before
            };
            if removed {
                queue.emit();
            }
        });
    }
}
