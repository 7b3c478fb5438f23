//! Event types for observing the consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus};

/// What the consumer did with a single received message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    /// Work succeeded, status moved to `Completed`, message acknowledged.
    Completed { job_id: JobId, duration_ms: u64 },
    /// Work failed, status moved to `Failed`, message acknowledged.
    Failed {
        job_id: JobId,
        duration_ms: u64,
        error: String,
    },
    /// Duplicate delivery of a finished job. Acknowledged without executing.
    SkippedTerminal { job_id: JobId, status: JobStatus },
    /// The referenced record does not exist. Acknowledged without executing.
    SkippedMissing { job_id: JobId },
    /// Another worker holds the claim. Left for redelivery.
    SkippedInProgress { job_id: JobId },
    /// The conditional write lost a race.
    Conflict { job_id: JobId, acknowledged: bool },
    /// Body could not be decoded. Acknowledged and dropped.
    Dropped { reason: String },
}

impl Disposition {
    /// Whether the message was acknowledged (deleted from the queue).
    pub fn acknowledged(&self) -> bool {
        match self {
            Disposition::Completed { .. }
            | Disposition::Failed { .. }
            | Disposition::SkippedTerminal { .. }
            | Disposition::SkippedMissing { .. }
            | Disposition::Dropped { .. } => true,
            Disposition::SkippedInProgress { .. } => false,
            Disposition::Conflict { acknowledged, .. } => *acknowledged,
        }
    }

    /// Get the job ID this disposition refers to, if the body was decodable.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Disposition::Completed { job_id, .. }
            | Disposition::Failed { job_id, .. }
            | Disposition::SkippedTerminal { job_id, .. }
            | Disposition::SkippedMissing { job_id }
            | Disposition::SkippedInProgress { job_id }
            | Disposition::Conflict { job_id, .. } => Some(*job_id),
            Disposition::Dropped { .. } => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Completed { .. } => "completed",
            Disposition::Failed { .. } => "failed",
            Disposition::SkippedTerminal { .. } => "skipped_terminal",
            Disposition::SkippedMissing { .. } => "skipped_missing",
            Disposition::SkippedInProgress { .. } => "skipped_in_progress",
            Disposition::Conflict { .. } => "conflict",
            Disposition::Dropped { .. } => "dropped",
        }
    }
}

/// Events emitted by the consumer pool for observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConsumerEvent {
    /// A worker started polling.
    WorkerStarted {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker stopped after shutdown.
    WorkerStopped {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker failed unexpectedly and was replaced.
    WorkerRestarted {
        worker_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// A message was handled to completion.
    MessageProcessed {
        worker_id: String,
        message_id: String,
        disposition: Disposition,
        timestamp: DateTime<Utc>,
    },
    /// Handling a message hit an infrastructure error; it was not acknowledged
    /// unless the error happened during acknowledgment itself.
    MessageErrored {
        worker_id: String,
        message_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl ConsumerEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ConsumerEvent::WorkerStarted { timestamp, .. } => *timestamp,
            ConsumerEvent::WorkerStopped { timestamp, .. } => *timestamp,
            ConsumerEvent::WorkerRestarted { timestamp, .. } => *timestamp,
            ConsumerEvent::MessageProcessed { timestamp, .. } => *timestamp,
            ConsumerEvent::MessageErrored { timestamp, .. } => *timestamp,
        }
    }

    /// Get the worker that emitted this event.
    pub fn worker_id(&self) -> &str {
        match self {
            ConsumerEvent::WorkerStarted { worker_id, .. }
            | ConsumerEvent::WorkerStopped { worker_id, .. }
            | ConsumerEvent::WorkerRestarted { worker_id, .. }
            | ConsumerEvent::MessageProcessed { worker_id, .. }
            | ConsumerEvent::MessageErrored { worker_id, .. } => worker_id,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            ConsumerEvent::WorkerStarted { worker_id, .. } => format!("Worker {} started", worker_id),
            ConsumerEvent::WorkerStopped { worker_id, .. } => format!("Worker {} stopped", worker_id),
            ConsumerEvent::WorkerRestarted {
                worker_id, reason, ..
            } => format!("Worker {} restarted: {}", worker_id, reason),
            ConsumerEvent::MessageProcessed {
                message_id,
                disposition,
                ..
            } => match disposition.job_id() {
                Some(job_id) => format!(
                    "Message {} (job {}) -> {}",
                    message_id,
                    job_id,
                    disposition.as_str()
                ),
                None => format!("Message {} -> {}", message_id, disposition.as_str()),
            },
            ConsumerEvent::MessageErrored {
                message_id, error, ..
            } => format!("Message {} errored: {}", message_id, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_acknowledgment_follows_flag() {
        let job_id = JobId::new();
        assert!(!Disposition::Conflict {
            job_id,
            acknowledged: false
        }
        .acknowledged());
        assert!(Disposition::Conflict {
            job_id,
            acknowledged: true
        }
        .acknowledged());
        assert!(Disposition::SkippedMissing { job_id }.acknowledged());
        assert!(!Disposition::SkippedInProgress { job_id }.acknowledged());
    }

    #[test]
    fn dropped_has_no_job() {
        let dropped = Disposition::Dropped {
            reason: "expected value".into(),
        };
        assert_eq!(dropped.job_id(), None);
        assert!(dropped.acknowledged());
    }
}
