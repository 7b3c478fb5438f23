//! Status transitions through the store's conditional write.

use std::time::Duration;

use batch_core::{JobId, JobStatus};
use chrono::{TimeDelta, Utc};
use db::{CasOutcome, DbError, JobStore};

use crate::executor::Outcome;

/// Terminal status recorded for an execution outcome.
pub fn target_status(outcome: &Outcome) -> JobStatus {
    match outcome {
        Outcome::Succeeded => JobStatus::Completed,
        Outcome::Failed(_) => JobStatus::Failed,
    }
}

/// Take exclusive ownership of a job before executing it.
pub async fn claim<S: JobStore>(store: &S, id: JobId) -> Result<CasOutcome, DbError> {
    let outcome = store
        .conditional_set_status(id, JobStatus::Pending, JobStatus::Processing)
        .await?;
    tracing::debug!(job_id = %id, ?outcome, "Claim attempted");
    Ok(outcome)
}

/// Take over a claim that has not been touched for longer than `lease`.
///
/// The previous owner either crashed or failed to record its outcome; after
/// `Applied` the caller owns the job as if it had claimed it.
pub async fn reclaim<S: JobStore>(
    store: &S,
    id: JobId,
    lease: Duration,
) -> Result<CasOutcome, DbError> {
    let Some(stale_before) = TimeDelta::from_std(lease)
        .ok()
        .and_then(|lease| Utc::now().checked_sub_signed(lease))
    else {
        return Ok(CasOutcome::Conflict);
    };

    let outcome = store.reclaim_stale(id, stale_before).await?;
    tracing::debug!(job_id = %id, ?outcome, "Takeover of stale claim attempted");
    Ok(outcome)
}

/// Move a job from `from` to the terminal status matching `outcome`.
///
/// `Applied` means the result is durable and this caller owns it.
/// `Conflict` means another actor already moved the job.
pub async fn record_outcome<S: JobStore>(
    store: &S,
    id: JobId,
    from: JobStatus,
    outcome: &Outcome,
) -> Result<CasOutcome, DbError> {
    let next = target_status(outcome);
    let result = store.conditional_set_status(id, from, next).await?;
    if result == CasOutcome::Applied {
        tracing::info!(job_id = %id, from = %from, to = %next, "Job status updated");
    }
    Ok(result)
}
