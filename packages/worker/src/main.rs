//! Background worker: consumes job messages until asked to stop.

mod settings;

use std::error::Error;
use std::sync::Arc;

use broker::{BrokerBackend, BrokerConfig, MemoryQueue, MemoryQueueConfig, MessageQueue, SqsQueue};
use consumer::{ConsumerConfig, ConsumerPool, JobExecutor, JobSubmitter, SimulatedExecutor};
use db::{DbConfig, JobRepository};
use tracing_subscriber::EnvFilter;

use settings::{LogFormat, WorkerSettings};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = match settings::log_format() {
        LogFormat::Json => builder.json().with_target(false).try_init(),
        LogFormat::Text => builder.try_init(),
    };
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let db_config = DbConfig::from_env()?;
    let broker_config = BrokerConfig::from_env()?;
    let consumer_config = ConsumerConfig::from_env()?;
    let settings = WorkerSettings::from_env()?;

    tracing::info!(
        backend = broker_config.backend.as_str(),
        queue = %broker_config.queue_name,
        workers = consumer_config.workers,
        claim = consumer_config.claim,
        claim_lease_secs = consumer_config.claim_lease.as_secs(),
        conflict_policy = consumer_config.conflict_policy.as_str(),
        "Starting batch worker"
    );

    let db = db::init(&db_config).await?;
    let repo = JobRepository::new(db);

    let executor: Arc<dyn JobExecutor> = Arc::new(
        SimulatedExecutor::new(settings.work_duration)
            .with_failure_percent(settings.failure_percent),
    );

    match broker_config.backend {
        BrokerBackend::Memory => {
            let memory_config =
                MemoryQueueConfig::default().with_visibility_timeout(broker_config.visibility_timeout);
            let (queue, handle) = MemoryQueue::start(memory_config).await?;
            seed_demo_jobs(&repo, &queue, settings.demo_jobs).await;

            run(queue.clone(), repo, executor, consumer_config).await?;

            queue.shutdown();
            let _ = handle.await;
        }
        BrokerBackend::Sqs => {
            if settings.demo_jobs > 0 {
                tracing::warn!("WORKER_DEMO_JOBS is ignored with the SQS backend");
            }
            let queue = SqsQueue::connect(&broker_config).await?;
            run(queue, repo, executor, consumer_config).await?;
        }
    }

    tracing::info!("Batch worker stopped");
    Ok(())
}

/// Run the pool until a shutdown signal arrives.
async fn run<Q: MessageQueue>(
    queue: Q,
    repo: JobRepository,
    executor: Arc<dyn JobExecutor>,
    config: ConsumerConfig,
) -> Result<(), Box<dyn Error>> {
    let pool = ConsumerPool::start(queue, repo, executor, config).await?;

    let mut events = pool.subscribe();
    let reporter = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!("{}", event.description());
        }
    });

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, finishing in-flight messages");

    pool.shutdown().await?;
    reporter.abort();
    Ok(())
}

async fn seed_demo_jobs(repo: &JobRepository, queue: &MemoryQueue, count: usize) {
    if count == 0 {
        return;
    }

    let submitter = JobSubmitter::new(repo.clone(), queue.clone());
    for n in 1..=count {
        if let Err(e) = submitter.submit(&format!("demo job {n}")).await {
            tracing::warn!("Failed to submit demo job {}: {}", n, e);
        }
    }
    tracing::info!("Submitted {} demo jobs", count);
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
