#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use batch_core::{JobId, JobMessage, JobRecord, JobStatus};
use chrono::{DateTime, Utc};
use broker::{MemoryQueue, MemoryQueueConfig, MessageQueue, ReceivedMessage};
use consumer::{ExecutionFuture, FnExecutor, JobExecutor};
use db::{CasOutcome, DbConfig, DbError, JobRepository, JobStore};

/// A fresh in-memory store and broker per test.
pub async fn setup() -> Result<(MemoryQueue, JobRepository), Box<dyn Error>> {
    setup_with_visibility(Duration::from_secs(30)).await
}

/// Like [`setup`], with a custom visibility timeout for redelivery tests.
pub async fn setup_with_visibility(
    visibility: Duration,
) -> Result<(MemoryQueue, JobRepository), Box<dyn Error>> {
    let db = db::init(&DbConfig::memory()).await?;
    let config = MemoryQueueConfig::default()
        .with_visibility_timeout(visibility)
        .with_tick_interval(Duration::from_millis(10));
    let (queue, _handle) = MemoryQueue::start(config).await?;
    Ok((queue, JobRepository::new(db)))
}

/// Store a `Pending` job and publish its message.
pub async fn create_and_publish(
    queue: &MemoryQueue,
    repo: &JobRepository,
    description: &str,
) -> Result<JobRecord, Box<dyn Error>> {
    let record = repo.create(&JobRecord::new(description)).await?;
    publish(queue, &record).await?;
    Ok(record)
}

pub async fn publish(queue: &MemoryQueue, record: &JobRecord) -> Result<(), Box<dyn Error>> {
    queue.publish(JobMessage::from(record).encode()?).await?;
    Ok(())
}

pub async fn receive_one(queue: &MemoryQueue) -> Result<ReceivedMessage, Box<dyn Error>> {
    let mut batch = queue.receive(1, Duration::from_secs(1)).await?;
    if batch.is_empty() {
        return Err("no message received".into());
    }
    Ok(batch.remove(0))
}

/// Executor that counts invocations, optionally sleeping and failing.
pub fn counting_executor(
    calls: Arc<AtomicUsize>,
    delay: Duration,
    fail: bool,
) -> Arc<dyn JobExecutor> {
    Arc::new(FnExecutor::new(move |_| -> ExecutionFuture {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            if fail {
                Err("renderer crashed".to_string())
            } else {
                Ok(())
            }
        })
    }))
}

/// A store whose every call fails as if the database were down.
pub struct UnreachableStore;

impl JobStore for UnreachableStore {
    async fn get_status(&self, _id: JobId) -> Result<Option<JobStatus>, DbError> {
        Err(DbError::Query("connection refused".into()))
    }

    async fn conditional_set_status(
        &self,
        _id: JobId,
        _expected: JobStatus,
        _next: JobStatus,
    ) -> Result<CasOutcome, DbError> {
        Err(DbError::Query("connection refused".into()))
    }

    async fn reclaim_stale(
        &self,
        _id: JobId,
        _stale_before: DateTime<Utc>,
    ) -> Result<CasOutcome, DbError> {
        Err(DbError::Query("connection refused".into()))
    }
}

/// Wraps the repository and fails the first write to a terminal status,
/// as if the database dropped out mid-run.
pub struct FlakyTerminalWrites {
    pub inner: JobRepository,
    pub tripped: AtomicBool,
}

impl FlakyTerminalWrites {
    pub fn new(inner: JobRepository) -> Self {
        Self {
            inner,
            tripped: AtomicBool::new(false),
        }
    }
}

impl JobStore for FlakyTerminalWrites {
    async fn get_status(&self, id: JobId) -> Result<Option<JobStatus>, DbError> {
        self.inner.get_status(id).await
    }

    async fn conditional_set_status(
        &self,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
    ) -> Result<CasOutcome, DbError> {
        if next.is_terminal() && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(DbError::Query("transient outage".into()));
        }
        self.inner.conditional_set_status(id, expected, next).await
    }

    async fn reclaim_stale(
        &self,
        id: JobId,
        stale_before: DateTime<Utc>,
    ) -> Result<CasOutcome, DbError> {
        self.inner.reclaim_stale(id, stale_before).await
    }
}

/// Wraps the repository and panics on the first status lookup, taking the
/// calling worker down with it.
pub struct PanicOnFirstLookup {
    pub inner: JobRepository,
    pub tripped: AtomicBool,
}

impl PanicOnFirstLookup {
    pub fn new(inner: JobRepository) -> Self {
        Self {
            inner,
            tripped: AtomicBool::new(false),
        }
    }
}

impl JobStore for PanicOnFirstLookup {
    async fn get_status(&self, id: JobId) -> Result<Option<JobStatus>, DbError> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            panic!("store driver crashed");
        }
        self.inner.get_status(id).await
    }

    async fn conditional_set_status(
        &self,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
    ) -> Result<CasOutcome, DbError> {
        self.inner.conditional_set_status(id, expected, next).await
    }

    async fn reclaim_stale(
        &self,
        id: JobId,
        stale_before: DateTime<Utc>,
    ) -> Result<CasOutcome, DbError> {
        self.inner.reclaim_stale(id, stale_before).await
    }
}
