use reel_config::{Config, RecurringJobConfig};
use reel_model::{DEFAULT_GROUP, JobKey};
use reel_server::App;
use serde_json::json;
use tempfile::TempDir;

fn config(url: String) -> Config {
    let mut config = Config::default();
    config.database.url = url;
    config.database.max_connections = 1;
    config.scheduler.thread_pool_size = 2;
    config.scheduler.idle_wait_ms = 100;
    config.scheduler.recurring_jobs.push(RecurringJobConfig {
        job_type: "QueueSummary".into(),
        name: Some("hourly-summary".into()),
        interval_secs: 3_600,
        start_delay_secs: 3_600,
        data: json!({ "label": "hourly" })
            .as_object()
            .cloned()
            .unwrap_or_default(),
    });
    config
}

fn summary_key() -> JobKey {
    JobKey::new("hourly-summary", DEFAULT_GROUP)
}

#[tokio::test]
async fn start_registers_recurring_summary() {
    let app = App::build(&config("sqlite::memory:".into())).await.unwrap();
    assert!(!app.scheduler().check_exists(&summary_key()).await.unwrap());

    app.start().await.unwrap();

    assert!(app.scheduler().check_exists(&summary_key()).await.unwrap());
    assert!(!app.queue().paused());
    assert_eq!(app.queue().total_waiting_job_count().await.unwrap(), 0);

    app.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn recurring_summary_survives_restart() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", dir.path().join("queue.db").display());

    let first = App::build(&config(url.clone())).await.unwrap();
    first.start().await.unwrap();
    first.shutdown(true).await.unwrap();
    drop(first);

    let mut without_recurring = config(url);
    without_recurring.scheduler.recurring_jobs.clear();
    let second = App::build(&without_recurring).await.unwrap();
    assert!(second.scheduler().check_exists(&summary_key()).await.unwrap());
}

#[tokio::test]
async fn clear_keeps_recurring_summary() {
    let app = App::build(&config("sqlite::memory:".into())).await.unwrap();
    app.start().await.unwrap();

    app.queue().clear().await.unwrap();

    assert!(app.scheduler().check_exists(&summary_key()).await.unwrap());
    app.shutdown(true).await.unwrap();
}
