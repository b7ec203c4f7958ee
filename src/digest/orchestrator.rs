use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::DigestSettings;
use crate::digest::composer::compose;
use crate::digest::outcome::{DigestResult, FailureReason, RunSummary};
use crate::domain::listing::ListingQuery;
use crate::domain::message::Message;
use crate::domain::subscriber::Subscriber;
use crate::email_client::{DeliveryError, MailDispatcher};
use crate::listings_client::{ListingsError, ListingsProvider};
use crate::preference_store::{PreferenceStore, StoreError};

/// Where the current run stands. `Processing` counts finished subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching,
    Processing { processed: usize, total: usize },
    Summarizing,
}

/// Drives every subscriber through listings -> composer -> mail, one isolated task per
/// subscriber, at most `worker_pool_size` at a time.
pub struct DigestOrchestrator {
    store: Arc<dyn PreferenceStore>,
    job: Arc<SubscriberJob>,
    settings: DigestSettings,
    state: watch::Sender<RunState>,
}

struct SubscriberJob {
    listings: Arc<dyn ListingsProvider>,
    mailer: Arc<dyn MailDispatcher>,
    settings: DigestSettings,
}

impl DigestOrchestrator {
    pub fn new(
        store: Arc<dyn PreferenceStore>,
        listings: Arc<dyn ListingsProvider>,
        mailer: Arc<dyn MailDispatcher>,
        settings: DigestSettings,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Idle);

        Self {
            store,
            job: Arc::new(SubscriberJob {
                listings,
                mailer,
                settings: settings.clone(),
            }),
            settings,
            state,
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Execute one run. Only a failure to read the subscriber snapshot aborts it; every
    /// other failure ends up as a `Failed` result in the summary.
    #[tracing::instrument(name = "Running the adoptable pets digest", skip_all, fields(run_id = %Uuid::new_v4()))]
    pub async fn run(&self, cancellation: &CancellationToken) -> Result<RunSummary, StoreError> {
        let started_at = Utc::now();
        self.state.send_replace(RunState::Fetching);

        let snapshot = match self.store.list_subscribers_with_preferences().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::error!(error.cause_chain = ?err, "Failed to load subscribers, aborting the run.");
                self.state.send_replace(RunState::Idle);
                return Err(err);
            }
        };

        let subscribers = snapshot.subscribers;
        let total = subscribers.len();
        tracing::info!(
            subscribers = total,
            skipped = snapshot.skipped,
            "Subscriber snapshot loaded."
        );
        self.state
            .send_replace(RunState::Processing { processed: 0, total });

        let (sender, receiver) = mpsc::channel(self.settings.worker_pool_size());
        let ((), summary) = tokio::join!(
            self.dispatch(subscribers, sender, cancellation),
            self.collect(receiver, started_at, total)
        );

        self.state.send_replace(RunState::Summarizing);
        let mut summary = summary.finish(Utc::now());
        summary.skipped = snapshot.skipped;
        summary.log();
        self.state.send_replace(RunState::Idle);

        Ok(summary)
    }

    /// Launch one task per subscriber, bounded by the worker pool. Once cancelled, nothing
    /// new is launched and the remaining subscribers are reported as cancelled.
    async fn dispatch(
        &self,
        subscribers: Vec<Subscriber>,
        sender: mpsc::Sender<DigestResult>,
        cancellation: &CancellationToken,
    ) {
        let permits = Arc::new(Semaphore::new(self.settings.worker_pool_size()));
        let mut workers = Vec::with_capacity(subscribers.len());
        let mut pending = subscribers.into_iter();

        while let Some(subscriber) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = cancellation.cancelled() => None,
                permit = permits.clone().acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                let remaining = std::iter::once(subscriber).chain(pending.by_ref());
                tracing::warn!("Digest run cancelled, no further subscribers will be processed.");

                for subscriber in remaining {
                    let _ = sender
                        .send(DigestResult::failed(subscriber.id, FailureReason::Cancelled))
                        .await;
                }
                break;
            };

            let job = Arc::clone(&self.job);
            let worker_sender = sender.clone();
            let subscriber_id = subscriber.id;
            let span = tracing::info_span!("Processing subscriber", subscriber_id = %subscriber_id);
            let handle = tokio::spawn(
                async move {
                    let result = job.process_with_timeout(subscriber).await;
                    drop(permit);
                    let _ = worker_sender.send(result).await;
                }
                .instrument(span),
            );

            workers.push((subscriber_id, handle));
        }

        for (subscriber_id, handle) in workers {
            // A worker that panicked never reported, so report for it
            if let Err(err) = handle.await {
                tracing::error!(subscriber_id = %subscriber_id, error = %err, "Digest worker aborted.");
                let _ = sender
                    .send(DigestResult::failed(
                        subscriber_id,
                        FailureReason::Aborted(err.to_string()),
                    ))
                    .await;
            }
        }
    }

    /// Sole owner of the run summary.
    async fn collect(
        &self,
        mut receiver: mpsc::Receiver<DigestResult>,
        started_at: DateTime<Utc>,
        total: usize,
    ) -> RunSummary {
        let mut summary = RunSummary::new(started_at);

        while let Some(result) = receiver.recv().await {
            summary.record(result);
            self.state.send_replace(RunState::Processing {
                processed: summary.total(),
                total,
            });
        }

        summary
    }
}

impl SubscriberJob {
    async fn process_with_timeout(&self, subscriber: Subscriber) -> DigestResult {
        let subscriber_id = subscriber.id;

        match tokio::time::timeout(self.settings.subscriber_timeout(), self.process(&subscriber))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Subscriber processing timed out.");
                DigestResult::failed(subscriber_id, FailureReason::TimedOut)
            }
        }
    }

    async fn process(&self, subscriber: &Subscriber) -> DigestResult {
        let query = ListingQuery::from(subscriber);

        let listings = match self
            .settings
            .listing_retry_policy()
            .run(
                || self.listings.find_matches(&query),
                ListingsError::is_retryable,
            )
            .await
        {
            Ok(listings) => listings,
            Err(err) => {
                tracing::warn!(error.cause_chain = ?err, "Failed to fetch listings.");
                return DigestResult::failed(subscriber.id, FailureReason::from(&err));
            }
        };

        if listings.is_empty() {
            if self.settings.send_no_matches_email {
                if let Err(err) = self.deliver(subscriber, &compose(subscriber, &[])).await {
                    return DigestResult::failed(subscriber.id, FailureReason::from(&err));
                }
            }

            return DigestResult::no_matches(subscriber.id);
        }

        let listings: Vec<_> = listings
            .into_iter()
            .take(self.settings.max_listings_per_digest.max(1))
            .collect();
        let message = compose(subscriber, &listings);

        match self.deliver(subscriber, &message).await {
            Ok(()) => DigestResult::sent(subscriber.id),
            Err(err) => DigestResult::failed(subscriber.id, FailureReason::from(&err)),
        }
    }

    async fn deliver(&self, subscriber: &Subscriber, message: &Message) -> Result<(), DeliveryError> {
        self.settings
            .delivery_retry_policy()
            // The transport does not tell transient from permanent failures apart
            .run(
                || self.mailer.send(&subscriber.email, message),
                |_: &DeliveryError| true,
            )
            .await
            .map_err(|err| {
                tracing::warn!(error.cause_chain = ?err, "Failed to deliver the digest.");
                err
            })
    }
}
