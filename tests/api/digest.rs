use secrecy::Secret;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use adoptable_pets::config::DigestSettings;
use adoptable_pets::digest::composer::NO_MATCHES_TEXT;
use adoptable_pets::digest::{DigestOrchestrator, DigestOutcome, FailureReason, RunState};
use adoptable_pets::domain::subscriber::Subscriber;
use adoptable_pets::domain::subscriber_email::SubscriberEmail;
use adoptable_pets::email_client::EmailClient;
use adoptable_pets::listings_client::ListingsClient;
use adoptable_pets::preference_store::StoreError;

use crate::fakes::{
    digest_settings, subscriber, InMemoryStore, RecordingMailer, Scripted, ScriptedListings,
};
use crate::helpers::init_tracing;

struct Pipeline {
    orchestrator: DigestOrchestrator,
    listings: Arc<ScriptedListings>,
    mailer: Arc<RecordingMailer>,
    store: Arc<InMemoryStore>,
}

fn pipeline(
    subscribers: Vec<Subscriber>,
    listings: ScriptedListings,
    mailer: RecordingMailer,
    settings: DigestSettings,
) -> Pipeline {
    init_tracing();

    let store = Arc::new(InMemoryStore::new(subscribers));
    let listings = Arc::new(listings);
    let mailer = Arc::new(mailer);
    let orchestrator =
        DigestOrchestrator::new(store.clone(), listings.clone(), mailer.clone(), settings);

    Pipeline {
        orchestrator,
        listings,
        mailer,
        store,
    }
}

#[tokio::test]
async fn every_subscriber_gets_exactly_one_result() {
    let species = ["dog", "cat", "rabbit", "bird", "horse"];
    let subscribers: Vec<_> = (0..20)
        .map(|n| subscriber(species[n % species.len()], None))
        .collect();
    let ids: HashSet<_> = subscribers.iter().map(|s| s.id).collect();
    let listings = ScriptedListings::new()
        .script("dog", vec![Scripted::Listings(2)])
        .script("cat", vec![Scripted::Unavailable])
        .script("rabbit", vec![Scripted::Rejected])
        .script("bird", vec![Scripted::Listings(0)])
        .script("horse", vec![Scripted::Listings(5)]);
    let pipeline = pipeline(subscribers, listings, RecordingMailer::new(), digest_settings());

    let summary = pipeline
        .orchestrator
        .run(&CancellationToken::new())
        .await
        .unwrap();

    let reported: HashSet<_> = summary.results().iter().map(|r| r.subscriber_id).collect();
    assert_eq!(summary.total(), 20);
    assert_eq!(reported, ids);
    assert_eq!(summary.sent + summary.no_matches + summary.failed, 20);
    assert_eq!(summary.sent, 8);
    assert_eq!(summary.no_matches, 4);
    assert_eq!(summary.failed, 8);
    assert_eq!(summary.failures.len(), 8);
    assert_eq!(pipeline.mailer.delivered().len(), 8);
}

#[tokio::test]
async fn matching_subscribers_get_mail_and_the_others_do_not() {
    let austin_dog_lover = subscriber("dog", Some("Austin"));
    let iguana_fan = subscriber("iguana", None);
    let listings = ScriptedListings::new()
        .script("dog", vec![Scripted::Listings(3)])
        .script("iguana", vec![Scripted::Listings(0)]);
    let pipeline = pipeline(
        vec![austin_dog_lover.clone(), iguana_fan.clone()],
        listings,
        RecordingMailer::new(),
        digest_settings(),
    );

    let summary = pipeline
        .orchestrator
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.sent, 1);
    assert_eq!(summary.no_matches, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(
        summary.result_for(iguana_fan.id).unwrap().outcome,
        DigestOutcome::NoMatches
    );

    let delivered = pipeline.mailer.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, austin_dog_lover.email.as_ref());
    assert_eq!(delivered[0].1.html_body.matches("<li>").count(), 3);
    assert!(delivered[0].1.text_body.contains("near Austin, TX"));
}

#[tokio::test]
async fn rejected_queries_are_not_retried() {
    let picky = subscriber("dragon", None);
    let listings = ScriptedListings::new().script("dragon", vec![Scripted::Rejected]);
    let pipeline = pipeline(
        vec![picky.clone()],
        listings,
        RecordingMailer::new(),
        digest_settings(),
    );

    let summary = pipeline
        .orchestrator
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(pipeline.listings.calls("dragon"), 1);
    assert!(matches!(
        summary.result_for(picky.id).unwrap().failure_reason,
        Some(FailureReason::ProviderRejected(_))
    ));
    assert_eq!(pipeline.mailer.attempts(), 0);
}

#[tokio::test]
async fn transient_provider_failures_are_retried_until_success() {
    let patient = subscriber("dog", None);
    let listings = ScriptedListings::new().script(
        "dog",
        vec![
            Scripted::Unavailable,
            Scripted::Unavailable,
            Scripted::Listings(1),
        ],
    );
    let pipeline = pipeline(
        vec![patient.clone()],
        listings,
        RecordingMailer::new(),
        digest_settings(),
    );

    let summary = pipeline
        .orchestrator
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(pipeline.listings.calls("dog"), 3);
    assert_eq!(
        summary.result_for(patient.id).unwrap().outcome,
        DigestOutcome::Sent
    );
    assert_eq!(pipeline.mailer.delivered().len(), 1);
}

#[tokio::test]
async fn one_provider_outage_does_not_affect_other_subscribers() {
    let unlucky = subscriber("cat", None);
    let lucky = subscriber("dog", None);
    let listings = ScriptedListings::new()
        .script("cat", vec![Scripted::Unavailable])
        .script("dog", vec![Scripted::Listings(2)]);
    let pipeline = pipeline(
        vec![unlucky.clone(), lucky.clone()],
        listings,
        RecordingMailer::new(),
        digest_settings(),
    );

    let summary = pipeline
        .orchestrator
        .run(&CancellationToken::new())
        .await
        .unwrap();

    // One attempt plus the two configured retries
    assert_eq!(pipeline.listings.calls("cat"), 3);
    assert!(matches!(
        summary.result_for(unlucky.id).unwrap().failure_reason,
        Some(FailureReason::ProviderUnavailable(_))
    ));
    assert_eq!(
        summary.result_for(lucky.id).unwrap().outcome,
        DigestOutcome::Sent
    );
}

#[tokio::test]
async fn failed_deliveries_are_retried_then_reported() {
    let bouncing = subscriber("dog", None);
    let mailer = RecordingMailer::failing_for(vec![bouncing.email.as_ref().to_string()]);
    let listings = ScriptedListings::new().script("dog", vec![Scripted::Listings(1)]);
    let pipeline = pipeline(vec![bouncing.clone()], listings, mailer, digest_settings());

    let summary = pipeline
        .orchestrator
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(pipeline.mailer.attempts(), 3);
    assert_eq!(summary.failed, 1);
    assert!(matches!(
        summary.result_for(bouncing.id).unwrap().failure_reason,
        Some(FailureReason::DeliveryFailed(_))
    ));
}

#[tokio::test]
async fn no_matches_mail_is_sent_only_when_enabled() {
    let iguana_fan = subscriber("iguana", None);
    let settings = DigestSettings {
        send_no_matches_email: true,
        ..digest_settings()
    };
    let pipeline = pipeline(
        vec![iguana_fan.clone()],
        ScriptedListings::new(),
        RecordingMailer::new(),
        settings,
    );

    let summary = pipeline
        .orchestrator
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.no_matches, 1);
    let delivered = pipeline.mailer.delivered();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].1.text_body.contains(NO_MATCHES_TEXT));
}

#[tokio::test]
async fn digests_are_capped_at_the_configured_size() {
    let greedy = subscriber("dog", None);
    let settings = DigestSettings {
        max_listings_per_digest: 4,
        ..digest_settings()
    };
    let listings = ScriptedListings::new().script("dog", vec![Scripted::Listings(9)]);
    let pipeline = pipeline(vec![greedy], listings, RecordingMailer::new(), settings);

    pipeline
        .orchestrator
        .run(&CancellationToken::new())
        .await
        .unwrap();

    let delivered = pipeline.mailer.delivered();
    assert_eq!(delivered[0].1.html_body.matches("<li>").count(), 4);
    assert_eq!(delivered[0].1.subject, "4 adoptable pets match your preferences");
}

#[tokio::test]
async fn store_failure_aborts_the_run_before_any_work() {
    init_tracing();
    let listings = Arc::new(ScriptedListings::new());
    let mailer = Arc::new(RecordingMailer::new());
    let orchestrator = DigestOrchestrator::new(
        Arc::new(InMemoryStore::unavailable()),
        listings.clone(),
        mailer.clone(),
        digest_settings(),
    );

    let result = orchestrator.run(&CancellationToken::new()).await;

    assert!(matches!(result, Err(StoreError::StoreUnavailable(_))));
    assert_eq!(listings.total_calls(), 0);
    assert_eq!(mailer.attempts(), 0);
    assert_eq!(orchestrator.state(), RunState::Idle);
}

#[tokio::test]
async fn an_empty_snapshot_completes_with_an_empty_summary() {
    let pipeline = pipeline(
        Vec::new(),
        ScriptedListings::new(),
        RecordingMailer::new(),
        digest_settings(),
    );

    let summary = pipeline
        .orchestrator
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.total(), 0);
    assert!(summary.failures.is_empty());
    assert_eq!(pipeline.store.reads(), 1);
}

#[tokio::test]
async fn a_cancelled_run_reports_every_subscriber_as_cancelled() {
    let subscribers: Vec<_> = (0..5).map(|_| subscriber("dog", None)).collect();
    let listings = ScriptedListings::new().script("dog", vec![Scripted::Listings(1)]);
    let pipeline = pipeline(subscribers, listings, RecordingMailer::new(), digest_settings());
    let cancellation = CancellationToken::new();
    cancellation.cancel();

    let summary = pipeline.orchestrator.run(&cancellation).await.unwrap();

    assert_eq!(summary.total(), 5);
    assert_eq!(summary.failed, 5);
    assert!(summary
        .failures
        .iter()
        .all(|failure| failure.reason == FailureReason::Cancelled));
    assert_eq!(pipeline.listings.total_calls(), 0);
    assert_eq!(pipeline.mailer.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn a_stuck_subscriber_times_out_without_blocking_the_others() {
    let stuck = subscriber("cat", None);
    let fine = subscriber("dog", None);
    let settings = DigestSettings {
        subscriber_timeout_seconds: 5,
        ..digest_settings()
    };
    let listings = ScriptedListings::new()
        .script("cat", vec![Scripted::Hang])
        .script("dog", vec![Scripted::Listings(1)]);
    let pipeline = pipeline(
        vec![stuck.clone(), fine.clone()],
        listings,
        RecordingMailer::new(),
        settings,
    );

    let summary = pipeline
        .orchestrator
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        summary.result_for(stuck.id).unwrap().failure_reason,
        Some(FailureReason::TimedOut)
    );
    assert_eq!(
        summary.result_for(fine.id).unwrap().outcome,
        DigestOutcome::Sent
    );
}

#[tokio::test]
async fn the_run_state_returns_to_idle() {
    let pipeline = pipeline(
        vec![subscriber("dog", None)],
        ScriptedListings::new().script("dog", vec![Scripted::Listings(1)]),
        RecordingMailer::new(),
        digest_settings(),
    );
    let states = pipeline.orchestrator.subscribe_state();

    pipeline
        .orchestrator
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(*states.borrow(), RunState::Idle);
    assert_eq!(pipeline.orchestrator.state(), RunState::Idle);
}

#[tokio::test]
async fn real_clients_isolate_a_provider_outage() {
    init_tracing();
    let listings_server = MockServer::start().await;
    let email_server = MockServer::start().await;
    let cat_person = subscriber("cat", None);
    let dog_person = subscriber("dog", None);

    Mock::given(method("GET"))
        .and(path("/v2/animals"))
        .and(query_param("type", "cat"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&listings_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/animals"))
        .and(query_param("type", "dog"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "animals": [
                { "id": 11, "name": "Biscuit", "species": "Dog", "breeds": { "primary": "Beagle" } }
            ]
        })))
        .expect(1)
        .mount(&listings_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mail/send"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&email_server)
        .await;

    let listings_client = ListingsClient::new(
        listings_server.uri(),
        Secret::new("listings-key".into()),
        None,
        None,
    )
    .unwrap();
    let email_client = EmailClient::new(
        email_server.uri(),
        SubscriberEmail::parse("digest@example.com".into()).unwrap(),
        Secret::new("mail-key".into()),
        None,
    )
    .unwrap();
    let orchestrator = DigestOrchestrator::new(
        Arc::new(InMemoryStore::new(vec![cat_person.clone(), dog_person.clone()])),
        Arc::new(listings_client),
        Arc::new(email_client),
        digest_settings(),
    );

    let summary = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert!(matches!(
        summary.result_for(cat_person.id).unwrap().failure_reason,
        Some(FailureReason::ProviderUnavailable(_))
    ));
    assert_eq!(
        summary.result_for(dog_person.id).unwrap().outcome,
        DigestOutcome::Sent
    );
}

#[tokio::test(start_paused = true)]
async fn cancelling_mid_run_lets_in_flight_work_finish_and_skips_the_rest() {
    let stuck = subscriber("cat", None);
    let waiting = vec![subscriber("dog", None), subscriber("dog", None)];
    let settings = DigestSettings {
        worker_pool_size: 1,
        subscriber_timeout_seconds: 5,
        ..digest_settings()
    };
    let listings = ScriptedListings::new()
        .script("cat", vec![Scripted::Hang])
        .script("dog", vec![Scripted::Listings(1)]);
    let mut subscribers = vec![stuck.clone()];
    subscribers.extend(waiting.iter().cloned());
    let pipeline = pipeline(subscribers, listings, RecordingMailer::new(), settings);
    let cancellation = CancellationToken::new();

    tokio::spawn({
        let cancellation = cancellation.clone();
        async move {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            cancellation.cancel();
        }
    });

    let summary = pipeline.orchestrator.run(&cancellation).await.unwrap();

    assert_eq!(summary.total(), 3);
    assert_eq!(
        summary.result_for(stuck.id).unwrap().failure_reason,
        Some(FailureReason::TimedOut)
    );
    for subscriber in &waiting {
        assert_eq!(
            summary.result_for(subscriber.id).unwrap().failure_reason,
            Some(FailureReason::Cancelled)
        );
    }
    assert_eq!(pipeline.listings.calls("cat"), 1);
    assert_eq!(pipeline.listings.calls("dog"), 0);
}

#[tokio::test]
async fn rows_skipped_by_the_store_are_reported_in_the_summary() {
    init_tracing();
    let eligible = subscriber("dog", None);
    let listings = Arc::new(ScriptedListings::new().script("dog", vec![Scripted::Listings(1)]));
    let orchestrator = DigestOrchestrator::new(
        Arc::new(InMemoryStore::new(vec![eligible.clone()]).with_skipped(2)),
        listings,
        Arc::new(RecordingMailer::new()),
        digest_settings(),
    );

    let summary = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.total(), 1);
    assert_eq!(summary.sent, 1);
}
