mod support;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reel_core::concurrency::Ceiling;
use reel_core::store::{CompletionInstruction, JobStore};
use reel_model::{Trigger, TriggerKey, TriggerState};
use support::Harness;

async fn acquire(store: &JobStore, max_count: usize) -> Vec<Trigger> {
    store
        .acquire_next_triggers(Utc::now(), max_count, Duration::ZERO)
        .await
        .expect("acquire")
}

fn keys(triggers: &[Trigger]) -> HashSet<TriggerKey> {
    triggers.iter().map(|trigger| trigger.key.clone()).collect()
}

#[tokio::test]
async fn limited_type_accepts_only_its_ceiling() {
    let harness = Harness::new();
    let mut triggers = Vec::new();
    for name in ["a", "b", "c"] {
        triggers.push(harness.add_due("Sync", name).await.1);
    }

    let acquired = acquire(&harness.store, 4).await;
    assert_eq!(acquired.len(), 2);

    let acquired_keys = keys(&acquired);
    let left: Vec<_> = triggers
        .iter()
        .filter(|trigger| !acquired_keys.contains(&trigger.key))
        .collect();
    assert_eq!(left.len(), 1);
    assert_eq!(
        harness.store.trigger_state(&left[0].key).await.unwrap(),
        Some(TriggerState::Waiting)
    );

    // The two in-flight Syncs block the third until one completes.
    assert!(acquire(&harness.store, 4).await.is_empty());
    assert_eq!(harness.store.blocked_triggers_count().await.unwrap(), 1);
    assert_eq!(harness.store.waiting_triggers_count().await.unwrap(), 0);

    let bundles = harness.store.triggers_fired(&acquired[..1]).await.unwrap();
    harness
        .store
        .triggered_job_complete(&bundles[0], CompletionInstruction::Completed)
        .await
        .unwrap();

    let next = acquire(&harness.store, 4).await;
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].key, left[0].key);
}

#[tokio::test]
async fn group_members_never_run_together() {
    let harness = Harness::new();
    harness.add_due("Reindex", "catalog-reindex").await;
    harness.add_due("Vacuum", "catalog-vacuum").await;
    harness.add_due("Plain", "one").await;

    let acquired = acquire(&harness.store, 10).await;
    let exclusive: Vec<_> = acquired
        .iter()
        .filter(|trigger| trigger.job_key.name.starts_with("catalog"))
        .collect();
    assert_eq!(acquired.len(), 2);
    assert_eq!(exclusive.len(), 1);

    // While one member is in flight the other one is blocked.
    assert!(acquire(&harness.store, 10).await.is_empty());
    let excluded = harness.store.excluded_types().await.unwrap();
    assert!(excluded.contains("Reindex"));
    assert!(excluded.contains("Vacuum"));
}

#[tokio::test]
async fn unresolvable_type_is_parked_in_error() {
    let harness = Harness::new();
    harness.add_due("Plain", "ok-1").await;
    let (_, ghost) = harness.add_due("Ghost", "missing").await;
    harness.add_due("Plain", "ok-2").await;

    let acquired = acquire(&harness.store, 10).await;
    assert_eq!(acquired.len(), 2);
    assert!(!keys(&acquired).contains(&ghost.key));
    assert_eq!(
        harness.store.trigger_state(&ghost.key).await.unwrap(),
        Some(TriggerState::Error)
    );
}

#[tokio::test]
async fn overrides_are_clamped_to_max_allowed() {
    let overrides = HashMap::from([
        ("Capped".to_owned(), 10),
        ("Sync".to_owned(), 5),
        ("Unknown".to_owned(), 3),
    ]);
    let harness = Harness::with_overrides(overrides);
    let policy = harness.store.concurrency_policy();

    assert_eq!(policy.effective_ceiling("Capped").max(), Some(3));
    assert_eq!(policy.effective_ceiling("Sync").max(), Some(5));
    assert_eq!(policy.effective_ceiling("Unknown"), Ceiling::Unlimited);

    for name in ["a", "b", "c", "d", "e"] {
        harness.add_due("Capped", name).await;
    }
    assert_eq!(acquire(&harness.store, 10).await.len(), 3);
}

#[tokio::test]
async fn reloaded_overrides_apply_to_the_next_batch() {
    let harness = Harness::new();
    for name in ["a", "b", "c", "d"] {
        harness.add_due("Sync", name).await;
    }
    harness
        .store
        .reload_concurrency_overrides(&HashMap::from([("Sync".to_owned(), 1)]));

    assert_eq!(acquire(&harness.store, 10).await.len(), 1);
}

#[tokio::test]
async fn unmet_requirement_blocks_the_type() {
    let harness = Harness::new();
    harness.add_due("Fetch", "feed").await;
    harness.state.set_network_available(false);

    assert!(acquire(&harness.store, 10).await.is_empty());
    let results = harness.store.acquisition_filter_results();
    assert_eq!(results["network-required"], vec!["Fetch".to_owned()]);

    harness.state.set_network_available(true);
    assert_eq!(acquire(&harness.store, 10).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquirers_never_share_a_trigger() {
    let harness = Harness::new();
    for index in 0..40 {
        harness.add_due("Plain", &format!("job-{index}")).await;
    }

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&harness.store);
        tasks.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            for _ in 0..5 {
                mine.extend(acquire(&store, 3).await);
            }
            mine
        }));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        for trigger in task.await.unwrap() {
            assert!(seen.insert(trigger.key), "trigger acquired twice");
        }
    }
    assert_eq!(seen.len(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquirers_respect_the_ceiling() {
    let harness = Harness::new();
    for index in 0..10 {
        harness.add_due("Sync", &format!("sync-{index}")).await;
    }

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let store = Arc::clone(&harness.store);
        tasks.push(tokio::spawn(async move { acquire(&store, 4).await.len() }));
    }
    let mut total = 0;
    for task in tasks {
        total += task.await.unwrap();
    }
    assert_eq!(total, 2);
}
