use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::digest::orchestrator::DigestOrchestrator;
use crate::digest::outcome::RunSummary;
use crate::digest::recurrence::Recurrence;

#[derive(Debug)]
pub enum TriggerOutcome {
    Completed(RunSummary),
    /// The subscriber snapshot could not be read; nothing was sent.
    Aborted,
    /// Another run was still active when the trigger fired.
    Skipped,
}

/// Fires the digest on a fixed recurrence and guarantees that runs never overlap.
#[derive(Clone)]
pub struct DigestScheduler {
    orchestrator: Arc<DigestOrchestrator>,
    recurrence: Recurrence,
    run_guard: Arc<Mutex<()>>,
    cancellation: CancellationToken,
}

impl DigestScheduler {
    pub fn new(
        orchestrator: Arc<DigestOrchestrator>,
        recurrence: Recurrence,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            recurrence,
            run_guard: Arc::new(Mutex::new(())),
            cancellation,
        }
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Start a run unless one is already in progress.
    pub async fn trigger(&self) -> TriggerOutcome {
        let _guard = match self.run_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("A digest run is still in progress, skipping this trigger.");
                return TriggerOutcome::Skipped;
            }
        };

        match self.orchestrator.run(&self.cancellation).await {
            Ok(summary) => TriggerOutcome::Completed(summary),
            Err(_) => TriggerOutcome::Aborted,
        }
    }

    /// Tick on every recurrence boundary until cancelled, then wait for the active run to
    /// drain. Boundaries are wall-clock aligned, so restarts neither skip nor repeat one.
    pub async fn run_until_stopped(self) {
        let period = self.recurrence.period();
        let first_tick = self.recurrence.delay_until_next(Utc::now());
        let mut ticker = interval_at(Instant::now() + first_tick, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            period_secs = period.as_secs(),
            first_run_in_secs = first_tick.as_secs(),
            "Digest scheduler started."
        );

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => break,
                _ = ticker.tick() => {
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        scheduler.trigger().await;
                    });
                }
            }
        }

        let _ = self.run_guard.lock().await;
        tracing::info!("Digest scheduler stopped.");
    }
}
