mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reel_core::queue::{QueueHandler, RecurringJobRegistrar};
use reel_core::scheduler::{RecurringJobConfig, Scheduler, SchedulerConfig};
use reel_model::{DEFAULT_GROUP, JobKey, QueueEvent, TriggerBuilder};
use support::{Harness, PlainJob, due_job};
use tokio::sync::broadcast;

fn config() -> SchedulerConfig {
    SchedulerConfig {
        thread_pool_size: 2,
        idle_wait_ms: 200,
        batch_insert_timeout_ms: 20,
        recurring_jobs: vec![RecurringJobConfig {
            job_type: "Plain".to_owned(),
            name: Some("heartbeat".to_owned()),
            interval_secs: 60,
            start_delay_secs: 3_600,
            data: Default::default(),
        }],
        ..SchedulerConfig::default()
    }
}

fn drain_transitions(receiver: &mut broadcast::Receiver<QueueEvent>) -> Vec<&'static str> {
    let mut seen = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        match event {
            QueueEvent::Paused { .. } => seen.push("paused"),
            QueueEvent::Started { .. } => seen.push("started"),
            _ => {}
        }
    }
    seen
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn pause_and_resume_emit_one_event_per_transition() {
    let harness = Harness::new();
    let scheduler = Scheduler::new(config(), Arc::clone(&harness.store));
    let queue = QueueHandler::for_scheduler(Arc::clone(&scheduler));
    let mut events = queue.subscribe();

    assert!(queue.paused());
    scheduler.start().await.unwrap();
    assert!(!queue.paused());

    queue.pause();
    queue.pause();
    queue.resume();
    queue.resume();

    assert_eq!(
        drain_transitions(&mut events),
        vec!["started", "paused", "started"]
    );
    assert_eq!(queue.thread_count(), 2);

    scheduler.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn clear_keeps_only_recurring_jobs() {
    let harness = Harness::new();
    let scheduler = Scheduler::new(config(), Arc::clone(&harness.store));
    let queue = QueueHandler::for_scheduler(Arc::clone(&scheduler));
    scheduler.start().await.unwrap();

    let (job, _) = due_job("Plain", "later");
    let trigger = TriggerBuilder::new()
        .for_job(job.key.clone())
        .start_at(Utc::now() + chrono::Duration::hours(1))
        .build()
        .unwrap();
    scheduler.schedule_job(job.clone(), trigger).await.unwrap();
    assert!(scheduler.check_exists(&job.key).await.unwrap());

    queue.clear().await.unwrap();

    assert!(!scheduler.check_exists(&job.key).await.unwrap());
    assert!(
        scheduler
            .check_exists(&JobKey::new("heartbeat", DEFAULT_GROUP))
            .await
            .unwrap()
    );
    assert_eq!(queue.total_waiting_job_count().await.unwrap(), 0);

    scheduler.shutdown(true).await.unwrap();
}

fn due_recurring(job_type: &str, name: &str) -> RecurringJobConfig {
    RecurringJobConfig {
        job_type: job_type.to_owned(),
        name: Some(name.to_owned()),
        interval_secs: 60,
        start_delay_secs: 0,
        data: Default::default(),
    }
}

#[tokio::test]
async fn clear_empties_the_queue_until_recurring_jobs_return() {
    let harness = Harness::new();
    let config = SchedulerConfig {
        recurring_jobs: vec![
            due_recurring("Plain", "heartbeat"),
            due_recurring("Sync", "nightly-sync"),
        ],
        ..config()
    };
    let expected = config.recurring_jobs.len();
    // Never started, so nothing is acquired behind the counts.
    let scheduler = Scheduler::new(config, Arc::clone(&harness.store));
    let queue = QueueHandler::for_scheduler(Arc::clone(&scheduler));
    let recurring = scheduler.recurring_jobs();

    assert_eq!(recurring.register_recurring_jobs().await.unwrap(), expected);
    harness.add_due("Plain", "one-off").await;
    assert_eq!(queue.total_waiting_job_count().await.unwrap(), expected + 1);

    harness.store.clear_all_scheduling_data().await.unwrap();
    assert_eq!(queue.total_waiting_job_count().await.unwrap(), 0);

    assert_eq!(recurring.register_recurring_jobs().await.unwrap(), expected);
    assert_eq!(queue.total_waiting_job_count().await.unwrap(), expected);
}

#[tokio::test]
async fn recurring_job_past_the_calendar_is_skipped() {
    let harness = Harness::new();
    let mut distant = due_recurring("Sync", "distant");
    distant.start_delay_secs = u64::MAX;
    let config = SchedulerConfig {
        recurring_jobs: vec![due_recurring("Plain", "heartbeat"), distant],
        ..config()
    };
    let scheduler = Scheduler::new(config, Arc::clone(&harness.store));

    let registered = scheduler
        .recurring_jobs()
        .register_recurring_jobs()
        .await
        .unwrap();

    assert_eq!(registered, 1);
    assert!(
        !scheduler
            .check_exists(&JobKey::new("distant", DEFAULT_GROUP))
            .await
            .unwrap()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn started_jobs_run_once_and_are_removed() {
    let harness = Harness::new();
    let scheduler = Scheduler::new(config(), Arc::clone(&harness.store));
    let queue = QueueHandler::for_scheduler(Arc::clone(&scheduler));
    scheduler.start().await.unwrap();

    let key = scheduler
        .start_job::<PlainJob, _>(|job| job.target = "report".to_owned(), true, None)
        .await
        .unwrap();
    assert_eq!(key.name, "Plain(target=report)");

    let counter = Arc::clone(&harness.counter);
    eventually(|| {
        let counter = Arc::clone(&counter);
        async move { counter.get() == 1 }
    })
    .await;
    eventually(|| {
        let scheduler = Arc::clone(&scheduler);
        let key = key.clone();
        async move {
            !scheduler.check_exists(&key).await.unwrap()
                && scheduler.store().events().executing_jobs().is_empty()
        }
    })
    .await;

    assert!(queue.executing_jobs().is_empty());
    assert_eq!(queue.get_job_counts().await.unwrap().get("Plain"), None);

    scheduler.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn summary_lists_waiting_jobs_with_titles() {
    let harness = Harness::new();
    harness.add_due("Plain", "alpha").await;
    harness.add_due("Sync", "beta").await;

    let scheduler = Scheduler::new(config(), Arc::clone(&harness.store));
    let queue = QueueHandler::for_scheduler(scheduler);

    let jobs = queue.get_jobs(10, 0, false).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].title.as_deref(), Some("Plain alpha"));
    assert_eq!(jobs[1].title.as_deref(), Some("Sync beta"));
    assert!(jobs.iter().all(|item| !item.running && !item.blocked));

    let counts = queue.get_job_counts().await.unwrap();
    assert_eq!(counts.get("Plain"), Some(&1));
    assert_eq!(counts.get("Sync"), Some(&1));
}
