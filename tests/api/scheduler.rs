use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use adoptable_pets::digest::{DigestOrchestrator, DigestScheduler, Recurrence, TriggerOutcome};
use adoptable_pets::preference_store::PreferenceStore;

use crate::fakes::{
    digest_settings, subscriber, GatedStore, InMemoryStore, RecordingMailer, Scripted,
    ScriptedListings,
};
use crate::helpers::init_tracing;

fn scheduler(store: Arc<dyn PreferenceStore>, recurrence: Recurrence) -> DigestScheduler {
    init_tracing();

    let listings = ScriptedListings::new().script("dog", vec![Scripted::Listings(1)]);
    let orchestrator = DigestOrchestrator::new(
        store,
        Arc::new(listings),
        Arc::new(RecordingMailer::new()),
        digest_settings(),
    );

    DigestScheduler::new(Arc::new(orchestrator), recurrence, CancellationToken::new())
}

#[tokio::test]
async fn a_trigger_during_an_active_run_is_skipped() {
    let store = Arc::new(GatedStore::new(vec![subscriber("dog", None)]));
    let entered = store.entered.clone();
    let release = store.release.clone();
    let scheduler = scheduler(store, Recurrence::Weekly);

    let first = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.trigger().await }
    });
    entered.notified().await;

    let second = scheduler.trigger().await;
    assert!(matches!(second, TriggerOutcome::Skipped));

    release.notify_one();
    let first = first.await.unwrap();
    match first {
        TriggerOutcome::Completed(summary) => assert_eq!(summary.sent, 1),
        other => panic!("Expected a completed run, got {:?}", other),
    }
}

#[tokio::test]
async fn a_new_run_starts_once_the_previous_one_finished() {
    let store = Arc::new(InMemoryStore::new(vec![subscriber("dog", None)]));
    let scheduler = scheduler(store.clone(), Recurrence::Weekly);

    assert!(matches!(scheduler.trigger().await, TriggerOutcome::Completed(_)));
    assert!(matches!(scheduler.trigger().await, TriggerOutcome::Completed(_)));
    assert_eq!(store.reads(), 2);
}

#[tokio::test]
async fn an_unreadable_store_aborts_the_trigger() {
    let scheduler = scheduler(Arc::new(InMemoryStore::unavailable()), Recurrence::Weekly);

    assert!(matches!(scheduler.trigger().await, TriggerOutcome::Aborted));
}

#[tokio::test(start_paused = true)]
async fn runs_fire_once_per_period_until_cancelled() {
    let store = Arc::new(InMemoryStore::new(vec![subscriber("dog", None)]));
    let period = Duration::from_secs(3600);
    let scheduler = scheduler(store.clone(), Recurrence::Every(period));
    let cancellation = scheduler.cancellation();
    let handle = tokio::spawn(scheduler.run_until_stopped());

    // The first boundary is at most one period away, wherever the wall clock is
    tokio::time::sleep(period).await;
    assert_eq!(store.reads(), 1);

    tokio::time::sleep(period).await;
    assert_eq!(store.reads(), 2);

    cancellation.cancel();
    handle.await.unwrap();
}
