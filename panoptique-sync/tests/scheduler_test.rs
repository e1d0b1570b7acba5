mod common;

use common::{init_tracing, service, store_with_sources, test_settings, wait_until, ScriptedFeeds};
use panoptique_sync::{Scheduler, SyncSchedule, SyncSettings};
use std::sync::Arc;
use std::time::Duration;

fn settings(schedule: SyncSchedule, sync_on_startup: bool, startup_delay: Duration) -> SyncSettings {
    SyncSettings {
        schedule,
        sync_on_startup,
        startup_delay,
        ..test_settings()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn startup_pass_runs_after_the_delay() {
    init_tracing();
    let (store, _sources) = store_with_sources(1).await;
    let feeds = Arc::new(ScriptedFeeds::new());
    let service = service(store, feeds.clone());
    let settings = settings(
        SyncSchedule::Every(Duration::from_secs(3600)),
        true,
        Duration::from_millis(50),
    );

    let mut scheduler = Scheduler::new(service.clone(), &settings);
    scheduler.start().await.expect("start");
    assert!(scheduler.is_running());

    wait_until("startup pass to fetch", || feeds.calls().len() == 1).await;
    wait_until("startup pass to finish", || !service.is_pass_running()).await;

    scheduler.stop().await.expect("stop");
    assert!(!scheduler.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_cancels_a_pending_startup_pass() {
    init_tracing();
    let (store, _sources) = store_with_sources(1).await;
    let feeds = Arc::new(ScriptedFeeds::new());
    let service = service(store, feeds.clone());
    let settings = settings(
        SyncSchedule::Every(Duration::from_secs(3600)),
        true,
        Duration::from_millis(200),
    );

    let mut scheduler = Scheduler::new(service, &settings);
    scheduler.start().await.expect("start");
    scheduler.stop().await.expect("stop");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(feeds.calls().is_empty());
    assert!(!scheduler.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timer_stops_and_restarts_with_a_new_schedule() {
    init_tracing();
    let (store, _sources) = store_with_sources(1).await;
    let feeds = Arc::new(ScriptedFeeds::new());
    let service = service(store.clone(), feeds.clone());
    let settings = settings(
        SyncSchedule::Every(Duration::from_secs(1)),
        false,
        Duration::ZERO,
    );

    let mut scheduler = Scheduler::new(service.clone(), &settings);
    scheduler.start().await.expect("start");
    wait_until("first timed pass", || !feeds.calls().is_empty()).await;
    wait_until("timed pass to finish", || !service.is_pass_running()).await;
    scheduler.stop().await.expect("stop");

    // Make the source due again so any further tick would fetch it.
    sqlx::query("UPDATE sources SET last_sync = NULL")
        .execute(store.pool())
        .await
        .expect("reset last sync");
    let before = feeds.calls().len();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(feeds.calls().len(), before);

    let schedule = SyncSchedule::Every(Duration::from_secs(1));
    scheduler.restart(schedule.clone()).await.expect("restart");
    assert!(scheduler.is_running());
    assert_eq!(scheduler.schedule(), &schedule);
    wait_until("pass after restart", || feeds.calls().len() > before).await;

    scheduler.stop().await.expect("stop");
}
