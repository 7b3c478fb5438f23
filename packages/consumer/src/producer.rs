//! Producer side: create a job record and publish a message for it.

use batch_core::{JobId, JobMessage, JobRecord};
use broker::{MessageQueue, QueueError};
use db::{DbError, JobRepository};
use thiserror::Error;

/// Errors from submitting or reading jobs.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Job description must not be empty")]
    InvalidDescription,
    #[error("Job store error: {0}")]
    Store(#[from] DbError),
    #[error("Failed to encode job message: {0}")]
    Encode(#[from] serde_json::Error),
    /// The record was created but no message was published; it stays `Pending`.
    #[error("Job {job_id} was stored but could not be published: {source}")]
    Publish {
        job_id: JobId,
        #[source]
        source: QueueError,
    },
}

/// Creates jobs in `Pending` and announces them on the queue.
#[derive(Clone)]
pub struct JobSubmitter<Q> {
    repo: JobRepository,
    queue: Q,
}

impl<Q: MessageQueue> JobSubmitter<Q> {
    pub fn new(repo: JobRepository, queue: Q) -> Self {
        Self { repo, queue }
    }

    /// Store a new `Pending` job and publish its message.
    ///
    /// The two steps are not atomic. When publishing fails the stored
    /// record is left as is and the error carries its id.
    pub async fn submit(&self, description: &str) -> Result<JobRecord, SubmitError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(SubmitError::InvalidDescription);
        }

        let record = self.repo.create(&JobRecord::new(description)).await?;
        let body = JobMessage::from(&record).encode()?;

        let message_id = self
            .queue
            .publish(body)
            .await
            .map_err(|source| SubmitError::Publish {
                job_id: record.id,
                source,
            })?;

        tracing::info!(job_id = %record.id, message_id = %message_id, "Job submitted");
        Ok(record)
    }

    pub async fn get(&self, id: JobId) -> Result<Option<JobRecord>, SubmitError> {
        Ok(self.repo.get(id).await?)
    }

    /// Most recent jobs first.
    pub async fn list(&self, limit: usize) -> Result<Vec<JobRecord>, SubmitError> {
        Ok(self.repo.list(limit).await?)
    }
}
