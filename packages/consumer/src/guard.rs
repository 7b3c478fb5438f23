//! Idempotency guard: should this delivery run the job at all?
//!
//! The answer is advisory. Two workers can both see `Pending`; the
//! conditional write in the transition step settles who wins.

use batch_core::{JobId, JobStatus};
use db::{DbError, JobStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// The job is still `Pending`; execute it.
    Proceed,
    /// The job already finished; acknowledge without executing.
    SkipAlreadyTerminal(JobStatus),
    /// No record exists for the id; acknowledge without executing.
    SkipMissing,
    /// Another worker has claimed the job. The message is left alone unless
    /// the claim's lease has run out.
    SkipInProgress,
}

/// Map a looked-up status to a decision.
pub fn decide(status: Option<JobStatus>) -> GuardDecision {
    match status {
        None => GuardDecision::SkipMissing,
        Some(JobStatus::Pending) => GuardDecision::Proceed,
        Some(JobStatus::Processing) => GuardDecision::SkipInProgress,
        Some(status) => GuardDecision::SkipAlreadyTerminal(status),
    }
}

/// Look up the job and decide. Store failures propagate.
pub async fn check<S: JobStore>(store: &S, id: JobId) -> Result<GuardDecision, DbError> {
    let status = store.get_status(id).await?;
    Ok(decide(status))
}
