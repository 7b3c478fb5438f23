//! The per-message pipeline: receive, guard, execute, transition, acknowledge.

use std::sync::Arc;

use batch_core::{ConsumerEvent, Disposition, JobId, JobMessage, JobStatus};
use broker::{AckToken, MessageQueue, QueueError, ReceivedMessage};
use chrono::Utc;
use db::{CasOutcome, DbError, JobStore};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::config::{ConflictPolicy, ConsumerConfig};
use crate::executor::{JobExecutor, Outcome, run_executor};
use crate::guard::{self, GuardDecision};
use crate::transition;

/// Errors that leave a message unfinished.
///
/// Everything here is logged and the worker moves on; only the message is
/// affected.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The store could not be reached. The message is not acknowledged.
    #[error("Job store unavailable: {0}")]
    Store(#[from] DbError),
    /// Deleting the message failed, typically because its visibility window
    /// passed. The guard handles the redelivery.
    #[error("Acknowledgment failed: {0}")]
    Acknowledge(#[from] QueueError),
}

/// Everything one worker needs to handle messages.
///
/// Cloning is cheap; all clones share the same clients.
pub struct Pipeline<Q, S> {
    queue: Q,
    store: Arc<S>,
    executor: Arc<dyn JobExecutor>,
    config: ConsumerConfig,
    event_tx: Option<broadcast::Sender<ConsumerEvent>>,
}

impl<Q: Clone, S> Clone for Pipeline<Q, S> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            store: self.store.clone(),
            executor: self.executor.clone(),
            config: self.config.clone(),
            event_tx: self.event_tx.clone(),
        }
    }
}

impl<Q, S> Pipeline<Q, S>
where
    Q: MessageQueue,
    S: JobStore,
{
    pub fn new(queue: Q, store: S, executor: Arc<dyn JobExecutor>, config: ConsumerConfig) -> Self {
        Self {
            queue,
            store: Arc::new(store),
            executor,
            config,
            event_tx: None,
        }
    }

    /// Broadcast events for every handled message.
    pub fn with_events(mut self, tx: broadcast::Sender<ConsumerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Send an event to subscribers, if any.
    pub fn emit(&self, event: ConsumerEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// Long-poll the queue with the configured batch size and wait.
    pub async fn receive(&self) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.queue
            .receive(self.config.max_messages, self.config.wait)
            .await
    }

    /// Receive one batch and handle every message in it.
    ///
    /// Returns how many messages were received.
    pub async fn run_once(&self, worker_id: &str) -> Result<usize, QueueError> {
        let messages = self.receive().await?;
        for message in &messages {
            self.handle(worker_id, message).await;
        }
        Ok(messages.len())
    }

    /// Handle one message, logging and broadcasting the result.
    ///
    /// Never fails: errors are logged against the message and reported as
    /// `None`.
    pub async fn handle(&self, worker_id: &str, message: &ReceivedMessage) -> Option<Disposition> {
        let span = tracing::info_span!(
            "message",
            worker_id = %worker_id,
            message_id = %message.message_id,
            receive_count = message.receive_count,
        );

        match self.process(message).instrument(span).await {
            Ok(disposition) => {
                self.emit(ConsumerEvent::MessageProcessed {
                    worker_id: worker_id.to_string(),
                    message_id: message.message_id.clone(),
                    disposition: disposition.clone(),
                    timestamp: Utc::now(),
                });
                Some(disposition)
            }
            Err(e) => {
                tracing::error!(
                    worker_id = %worker_id,
                    message_id = %message.message_id,
                    error = %e,
                    "Failed to process message"
                );
                self.emit(ConsumerEvent::MessageErrored {
                    worker_id: worker_id.to_string(),
                    message_id: message.message_id.clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                None
            }
        }
    }

    /// Run a single message through the state machine.
    pub async fn process(&self, message: &ReceivedMessage) -> Result<Disposition, ProcessError> {
        let job = match JobMessage::decode(&message.body) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping message with unreadable body");
                self.acknowledge(&message.token).await?;
                return Ok(Disposition::Dropped {
                    reason: e.to_string(),
                });
            }
        };
        let job_id = job.id;

        if job.published_status().is_none() {
            tracing::debug!(job_id = %job_id, status = %job.status, "Unrecognised published status");
        }

        let from = match guard::check(self.store.as_ref(), job_id).await? {
            GuardDecision::SkipMissing => {
                tracing::warn!(job_id = %job_id, "Job record not found, skipping");
                self.acknowledge(&message.token).await?;
                return Ok(Disposition::SkippedMissing { job_id });
            }
            GuardDecision::SkipAlreadyTerminal(status) => {
                tracing::info!(job_id = %job_id, %status, "Job already finished, skipping duplicate");
                self.acknowledge(&message.token).await?;
                return Ok(Disposition::SkippedTerminal { job_id, status });
            }
            GuardDecision::SkipInProgress => {
                match transition::reclaim(self.store.as_ref(), job_id, self.config.claim_lease)
                    .await?
                {
                    CasOutcome::Applied => {
                        tracing::warn!(job_id = %job_id, "Claim lease expired, taking the job over");
                        JobStatus::Processing
                    }
                    CasOutcome::Conflict => {
                        tracing::info!(job_id = %job_id, "Job claimed by another worker, leaving message");
                        return Ok(Disposition::SkippedInProgress { job_id });
                    }
                }
            }
            GuardDecision::Proceed if self.config.claim => {
                match transition::claim(self.store.as_ref(), job_id).await? {
                    CasOutcome::Applied => JobStatus::Processing,
                    CasOutcome::Conflict => {
                        tracing::info!(job_id = %job_id, "Lost the claim to another worker");
                        return self.on_conflict(job_id, &message.token).await;
                    }
                }
            }
            GuardDecision::Proceed => JobStatus::Pending,
        };

        tracing::info!(job_id = %job_id, "Executing job");
        let execution =
            run_executor(self.executor.clone(), &job, self.config.execution_timeout).await;
        let duration_ms = u64::try_from(execution.duration.as_millis()).unwrap_or(u64::MAX);

        match transition::record_outcome(self.store.as_ref(), job_id, from, &execution.outcome)
            .await?
        {
            CasOutcome::Applied => {
                self.acknowledge(&message.token).await?;
                Ok(match execution.outcome {
                    Outcome::Succeeded => {
                        tracing::info!(job_id = %job_id, duration_ms, "Job completed");
                        Disposition::Completed {
                            job_id,
                            duration_ms,
                        }
                    }
                    Outcome::Failed(error) => {
                        tracing::info!(job_id = %job_id, duration_ms, error = %error, "Job failed");
                        Disposition::Failed {
                            job_id,
                            duration_ms,
                            error,
                        }
                    }
                })
            }
            CasOutcome::Conflict => {
                tracing::info!(
                    job_id = %job_id,
                    "Status already changed by another worker, discarding result"
                );
                self.on_conflict(job_id, &message.token).await
            }
        }
    }

    async fn on_conflict(&self, job_id: JobId, token: &AckToken) -> Result<Disposition, ProcessError> {
        let acknowledged = match self.config.conflict_policy {
            ConflictPolicy::LeaveForRedelivery => false,
            ConflictPolicy::AcknowledgeIfTerminal => {
                match self.store.get_status(job_id).await? {
                    Some(status) if status.is_terminal() => {
                        self.acknowledge(token).await?;
                        true
                    }
                    _ => false,
                }
            }
        };

        Ok(Disposition::Conflict {
            job_id,
            acknowledged,
        })
    }

    async fn acknowledge(&self, token: &AckToken) -> Result<(), QueueError> {
        self.queue.acknowledge(token).await
    }
}
