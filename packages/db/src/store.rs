//! The job store contract consumed by the pipeline.

use std::future::Future;

use batch_core::{JobId, JobStatus};
use chrono::{DateTime, Utc};

use crate::DbError;

/// Result of a conditional status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The stored status matched the expected value and was replaced.
    Applied,
    /// The stored status did not match (or the record is missing).
    /// Nothing was written.
    Conflict,
}

/// Point lookups, the compare-and-swap status write, and claim takeover.
///
/// `Err` is reserved for infrastructure failures. A missing record and a
/// lost race are ordinary results.
pub trait JobStore: Send + Sync + 'static {
    /// Look up the current status; `None` when no record exists.
    fn get_status(
        &self,
        id: JobId,
    ) -> impl Future<Output = Result<Option<JobStatus>, DbError>> + Send;

    /// Set `status` to `next` only if it currently equals `expected`.
    fn conditional_set_status(
        &self,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
    ) -> impl Future<Output = Result<CasOutcome, DbError>> + Send;

    /// Take over a `Processing` record whose last update is older than
    /// `stale_before`. `Applied` refreshes the update time and leaves the
    /// status as it is; anything else is a `Conflict`.
    fn reclaim_stale(
        &self,
        id: JobId,
        stale_before: DateTime<Utc>,
    ) -> impl Future<Output = Result<CasOutcome, DbError>> + Send;
}
