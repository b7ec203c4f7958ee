use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::email_client::DeliveryError;
use crate::listings_client::ListingsError;

/// Terminal classification of one subscriber within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestOutcome {
    Sent,
    NoMatches,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    ProviderUnavailable(String),
    ProviderRejected(String),
    DeliveryFailed(String),
    TimedOut,
    /// The run was cancelled before this subscriber was picked up.
    Cancelled,
    /// The worker processing this subscriber died unexpectedly.
    Aborted(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::ProviderUnavailable(detail) => {
                write!(f, "listings provider unavailable: {}", detail)
            }
            FailureReason::ProviderRejected(detail) => {
                write!(f, "listings provider rejected the query: {}", detail)
            }
            FailureReason::DeliveryFailed(detail) => write!(f, "delivery failed: {}", detail),
            FailureReason::TimedOut => write!(f, "timed out"),
            FailureReason::Cancelled => write!(f, "cancelled before processing"),
            FailureReason::Aborted(detail) => write!(f, "worker aborted: {}", detail),
        }
    }
}

impl From<&ListingsError> for FailureReason {
    fn from(err: &ListingsError) -> Self {
        match err {
            ListingsError::ProviderUnavailable(source) => {
                FailureReason::ProviderUnavailable(format!("{:#}", source))
            }
            ListingsError::ProviderRejected(source) => {
                FailureReason::ProviderRejected(format!("{:#}", source))
            }
        }
    }
}

impl From<&DeliveryError> for FailureReason {
    fn from(err: &DeliveryError) -> Self {
        match err {
            DeliveryError::DeliveryFailed(source) => {
                FailureReason::DeliveryFailed(format!("{:#}", source))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestResult {
    pub subscriber_id: Uuid,
    pub outcome: DigestOutcome,
    pub failure_reason: Option<FailureReason>,
}

impl DigestResult {
    pub fn sent(subscriber_id: Uuid) -> Self {
        Self {
            subscriber_id,
            outcome: DigestOutcome::Sent,
            failure_reason: None,
        }
    }

    pub fn no_matches(subscriber_id: Uuid) -> Self {
        Self {
            subscriber_id,
            outcome: DigestOutcome::NoMatches,
            failure_reason: None,
        }
    }

    pub fn failed(subscriber_id: Uuid, reason: FailureReason) -> Self {
        Self {
            subscriber_id,
            outcome: DigestOutcome::Failed,
            failure_reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberFailure {
    pub subscriber_id: Uuid,
    pub reason: FailureReason,
}

/// Aggregate of one run. Only the collector of a run writes to it.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sent: usize,
    pub no_matches: usize,
    pub failed: usize,
    /// Stored rows that were not eligible for a digest and never reached a worker.
    pub skipped: usize,
    pub failures: Vec<SubscriberFailure>,
    #[serde(skip)]
    results: Vec<DigestResult>,
}

impl RunSummary {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            sent: 0,
            no_matches: 0,
            failed: 0,
            skipped: 0,
            failures: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn record(&mut self, result: DigestResult) {
        match result.outcome {
            DigestOutcome::Sent => self.sent += 1,
            DigestOutcome::NoMatches => self.no_matches += 1,
            DigestOutcome::Failed => {
                self.failed += 1;
                self.failures.push(SubscriberFailure {
                    subscriber_id: result.subscriber_id,
                    reason: result
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| FailureReason::Aborted("no reason recorded".into())),
                });
            }
        }

        self.results.push(result);
    }

    pub fn finish(mut self, finished_at: DateTime<Utc>) -> Self {
        self.finished_at = finished_at;
        self
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Every per-subscriber result of the run, in completion order.
    pub fn results(&self) -> &[DigestResult] {
        &self.results
    }

    pub fn result_for(&self, subscriber_id: Uuid) -> Option<&DigestResult> {
        self.results
            .iter()
            .find(|result| result.subscriber_id == subscriber_id)
    }

    pub fn log(&self) {
        let failures = serde_json::to_string(&self.failures).unwrap_or_default();
        let elapsed_ms = (self.finished_at - self.started_at).num_milliseconds();

        tracing::info!(
            started_at = %self.started_at,
            finished_at = %self.finished_at,
            elapsed_ms,
            total = self.total(),
            sent = self.sent,
            no_matches = self.no_matches,
            failed = self.failed,
            skipped = self.skipped,
            failures = %failures,
            "Digest run finished."
        );
    }
}
