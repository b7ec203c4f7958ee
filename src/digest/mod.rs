pub mod composer;
pub mod orchestrator;
pub mod outcome;
pub mod recurrence;
pub mod retry;
pub mod scheduler;

pub use composer::compose;
pub use orchestrator::{DigestOrchestrator, RunState};
pub use outcome::{DigestOutcome, DigestResult, FailureReason, RunSummary};
pub use recurrence::Recurrence;
pub use retry::RetryPolicy;
pub use scheduler::{DigestScheduler, TriggerOutcome};
