//! Job executors and fault capture.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use batch_core::JobMessage;
use tokio::time::Instant;

/// Future type for async job executors. `Err` carries the failure reason.
pub type ExecutionFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// The opaque unit of work behind a job.
///
/// Executors never touch the job record; the pipeline records the outcome.
pub trait JobExecutor: Send + Sync + 'static {
    fn execute(&self, job: &JobMessage) -> ExecutionFuture;
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

/// Outcome plus wall-clock duration of one execution.
#[derive(Debug, Clone)]
pub struct Execution {
    pub outcome: Outcome,
    pub duration: Duration,
}

/// Run an executor, turning every fault into [`Outcome::Failed`].
///
/// The work runs on its own task so a panic is contained, and it is aborted
/// once `timeout` passes.
pub async fn run_executor(
    executor: Arc<dyn JobExecutor>,
    job: &JobMessage,
    timeout: Option<Duration>,
) -> Execution {
    let started = Instant::now();
    let job = job.clone();
    let mut task = tokio::spawn(async move { executor.execute(&job).await });

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                return Execution {
                    outcome: Outcome::Failed(format!("execution timed out after {:?}", limit)),
                    duration: started.elapsed(),
                };
            }
        },
        None => task.await,
    };

    let outcome = match joined {
        Ok(Ok(())) => Outcome::Succeeded,
        Ok(Err(error)) => Outcome::Failed(error),
        Err(e) if e.is_panic() => Outcome::Failed(format!("executor panicked: {}", panic_message(e))),
        Err(e) => Outcome::Failed(format!("executor task aborted: {}", e)),
    };

    Execution {
        outcome,
        duration: started.elapsed(),
    }
}

fn panic_message(error: tokio::task::JoinError) -> String {
    let payload = error.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A simple function-based executor.
pub struct FnExecutor<F>
where
    F: Fn(&JobMessage) -> ExecutionFuture + Send + Sync + 'static,
{
    executor: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(&JobMessage) -> ExecutionFuture + Send + Sync + 'static,
{
    pub fn new(executor: F) -> Self {
        Self { executor }
    }
}

impl<F> JobExecutor for FnExecutor<F>
where
    F: Fn(&JobMessage) -> ExecutionFuture + Send + Sync + 'static,
{
    fn execute(&self, job: &JobMessage) -> ExecutionFuture {
        (self.executor)(job)
    }
}

/// Description prefix that makes [`SimulatedExecutor`] fail the job.
pub const SIMULATED_FAILURE_PREFIX: &str = "fail:";

/// Stand-in work: sleeps for a fixed duration, then succeeds or fails.
///
/// A job fails when its description starts with [`SIMULATED_FAILURE_PREFIX`]
/// or when its id falls in the configured failure percentage. Both are
/// deterministic per job.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    work_duration: Duration,
    failure_percent: u8,
}

impl SimulatedExecutor {
    pub fn new(work_duration: Duration) -> Self {
        Self {
            work_duration,
            failure_percent: 0,
        }
    }

    /// Fail roughly this share of jobs (clamped to 100).
    pub fn with_failure_percent(mut self, percent: u8) -> Self {
        self.failure_percent = percent.min(100);
        self
    }

    fn should_fail(&self, job: &JobMessage) -> bool {
        job.description.starts_with(SIMULATED_FAILURE_PREFIX)
            || (job.id.as_uuid().as_u128() % 100) < u128::from(self.failure_percent)
    }
}

impl JobExecutor for SimulatedExecutor {
    fn execute(&self, job: &JobMessage) -> ExecutionFuture {
        let duration = self.work_duration;
        let fail = self.should_fail(job);
        let id = job.id;
        Box::pin(async move {
            tokio::time::sleep(duration).await;
            if fail {
                Err(format!("simulated failure for job {}", id))
            } else {
                Ok(())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use batch_core::JobRecord;

    fn message(description: &str) -> JobMessage {
        JobMessage::from(&JobRecord::new(description))
    }

    #[tokio::test]
    async fn success_and_error_outcomes() {
        let ok: Arc<dyn JobExecutor> = Arc::new(FnExecutor::new(|_| Box::pin(async { Ok(()) })));
        let execution = run_executor(ok, &message("a"), None).await;
        assert_eq!(execution.outcome, Outcome::Succeeded);

        let err: Arc<dyn JobExecutor> =
            Arc::new(FnExecutor::new(|_| Box::pin(async { Err("boom".to_string()) })));
        let execution = run_executor(err, &message("a"), None).await;
        assert_eq!(execution.outcome, Outcome::Failed("boom".into()));
    }

    #[tokio::test]
    async fn panic_becomes_failure() {
        let panicking: Arc<dyn JobExecutor> =
            Arc::new(FnExecutor::new(|_| -> ExecutionFuture { panic!("worker exploded") }));

        let execution = run_executor(panicking, &message("a"), None).await;
        match execution.outcome {
            Outcome::Failed(reason) => assert!(reason.contains("worker exploded")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn timeout_becomes_failure() {
        let slow: Arc<dyn JobExecutor> = Arc::new(SimulatedExecutor::new(Duration::from_secs(30)));

        let execution = run_executor(slow, &message("a"), Some(Duration::from_millis(50))).await;
        match execution.outcome {
            Outcome::Failed(reason) => assert!(reason.contains("timed out")),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(execution.duration < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn simulated_executor_is_deterministic() {
        let executor = SimulatedExecutor::new(Duration::from_millis(1));
        assert!(executor.execute(&message("render")).await.is_ok());
        assert!(executor.execute(&message("fail: bad input")).await.is_err());

        let always = Arc::new(executor.with_failure_percent(100));
        let execution = run_executor(always, &message("render"), None).await;
        assert!(!execution.outcome.is_success());
    }
}
