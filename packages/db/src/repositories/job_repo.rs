//! Job repository: record access and the conditional status write.

use std::future::Future;
use std::time::Duration;

use batch_core::{JobId, JobRecord, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::error::Db as SurrealDbError;
use surrealdb::sql::{Datetime, Thing};

use crate::store::{CasOutcome, JobStore};
use crate::{Database, DbError};

/// Attempts made when SurrealDB rejects a commit because of a concurrent write.
const MAX_TX_ATTEMPTS: u32 = 8;

/// Repository for job persistence operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct JobRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    description: String,
    status: JobStatus,
    created_at: Datetime,
    updated_at: Datetime,
}

impl JobRow {
    fn into_record(self, id: JobId) -> JobRecord {
        JobRecord {
            id,
            description: self.description,
            status: self.status,
            created_at: self.created_at.into(),
        }
    }
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new job in the database.
    pub async fn create(&self, job: &JobRecord) -> Result<JobRecord, DbError> {
        let row = JobRow {
            id: None,
            description: job.description.clone(),
            status: job.status,
            created_at: job.created_at.into(),
            updated_at: job.created_at.into(),
        };

        let record: Option<JobRow> = self
            .db
            .create(("job", job.id.to_string()))
            .content(row)
            .await?;

        record
            .map(|r| r.into_record(job.id))
            .ok_or_else(|| DbError::Query("Failed to create job".into()))
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Option<JobRecord>, DbError> {
        let record: Option<JobRow> = self.db.select(("job", id.to_string())).await?;

        Ok(record.map(|r| r.into_record(id)))
    }

    /// List the most recently created jobs.
    pub async fn list(&self, limit: usize) -> Result<Vec<JobRecord>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM job ORDER BY created_at DESC LIMIT $limit")
            .bind(("limit", limit as i64))
            .await?;

        let rows: Vec<JobRow> = result.take(0)?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let raw = r.id.as_ref().map(|t| t.id.to_raw()).unwrap_or_default();
                match JobId::parse(&raw) {
                    Ok(id) => Some(r.into_record(id)),
                    Err(e) => {
                        tracing::warn!("Skipping job row with malformed id {:?}: {}", raw, e);
                        None
                    }
                }
            })
            .collect())
    }

    async fn try_conditional_set(
        &self,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
    ) -> Result<CasOutcome, DbError> {
        // UPDATE on a record id never creates the record, so a missing job
        // and a mismatched status both come back as an empty result.
        let result = self
            .db
            .query(
                "UPDATE type::thing('job', $id) SET status = $next, updated_at = $now \
                 WHERE status = $expected RETURN AFTER",
            )
            .bind(("id", id.to_string()))
            .bind(("next", next))
            .bind(("expected", expected))
            .bind(("now", Datetime::from(Utc::now())))
            .await?;

        updated(result)
    }

    async fn try_reclaim(
        &self,
        id: JobId,
        stale_before: DateTime<Utc>,
    ) -> Result<CasOutcome, DbError> {
        let result = self
            .db
            .query(
                "UPDATE type::thing('job', $id) SET updated_at = $now \
                 WHERE status = $processing AND updated_at < $stale_before RETURN AFTER",
            )
            .bind(("id", id.to_string()))
            .bind(("processing", JobStatus::Processing))
            .bind(("stale_before", Datetime::from(stale_before)))
            .bind(("now", Datetime::from(Utc::now())))
            .await?;

        updated(result)
    }

    /// Re-run a conditional write while SurrealDB reports a retryable
    /// transaction conflict.
    async fn with_tx_retry<F, Fut>(&self, id: JobId, mut write: F) -> Result<CasOutcome, DbError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<CasOutcome, DbError>>,
    {
        let mut attempt = 1;
        loop {
            match write().await {
                Err(DbError::Connection(e)) if is_retryable(&e) && attempt < MAX_TX_ATTEMPTS => {
                    tracing::debug!(
                        job_id = %id,
                        attempt,
                        "Retrying status write after transaction conflict"
                    );
                    tokio::time::sleep(Duration::from_millis(5 * u64::from(attempt))).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn updated(mut result: surrealdb::Response) -> Result<CasOutcome, DbError> {
    let rows: Vec<JobRow> = result.take(0)?;

    Ok(if rows.is_empty() {
        CasOutcome::Conflict
    } else {
        CasOutcome::Applied
    })
}

impl JobStore for JobRepository {
    async fn get_status(&self, id: JobId) -> Result<Option<JobStatus>, DbError> {
        let record: Option<JobRow> = self.db.select(("job", id.to_string())).await?;

        Ok(record.map(|r| r.status))
    }

    async fn conditional_set_status(
        &self,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
    ) -> Result<CasOutcome, DbError> {
        if !expected.can_transition_to(next) {
            return Err(DbError::InvalidTransition {
                from: expected,
                to: next,
            });
        }

        self.with_tx_retry(id, || self.try_conditional_set(id, expected, next))
            .await
    }

    async fn reclaim_stale(
        &self,
        id: JobId,
        stale_before: DateTime<Utc>,
    ) -> Result<CasOutcome, DbError> {
        self.with_tx_retry(id, || self.try_reclaim(id, stale_before))
            .await
    }
}

/// Optimistic-concurrency commit failures from an embedded engine.
fn is_retryable(error: &surrealdb::Error) -> bool {
    matches!(error, surrealdb::Error::Db(SurrealDbError::TxRetryable))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transaction_conflicts_are_retried() {
        assert!(is_retryable(&surrealdb::Error::Db(SurrealDbError::TxRetryable)));
        assert!(!is_retryable(&surrealdb::Error::Db(
            SurrealDbError::TxKeyAlreadyExists
        )));
    }
}
