//! Handle to a running pool of consumer workers.

use std::sync::Arc;

use batch_core::{ConfigError, ConsumerEvent};
use broker::MessageQueue;
use db::JobStore;
use ractor::concurrency::JoinHandle;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::ConsumerConfig;
use crate::executor::JobExecutor;
use crate::messages::SupervisorMessage;
use crate::pipeline::Pipeline;
use crate::supervisor::{ConsumerSupervisor, SupervisorArgs};

/// Pool lifecycle errors.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to start consumer: {0}")]
    Spawn(String),
    #[error("Consumer supervisor unavailable: {0}")]
    Unavailable(String),
}

/// A fixed-size pool of workers consuming one queue.
pub struct ConsumerPool {
    supervisor: ActorRef<SupervisorMessage>,
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
    events: broadcast::Sender<ConsumerEvent>,
}

impl ConsumerPool {
    /// Validate the config and start `config.workers` workers.
    pub async fn start<Q, S>(
        queue: Q,
        store: S,
        executor: Arc<dyn JobExecutor>,
        config: ConsumerConfig,
    ) -> Result<Self, ConsumerError>
    where
        Q: MessageQueue,
        S: JobStore,
    {
        config.validate()?;

        let (events, _) = broadcast::channel(1024);
        let shutdown = CancellationToken::new();
        let workers = config.workers;
        let pipeline = Pipeline::new(queue, store, executor, config).with_events(events.clone());

        let args = SupervisorArgs {
            pipeline,
            workers,
            shutdown: shutdown.clone(),
        };
        let (supervisor, handle) = Actor::spawn(None, ConsumerSupervisor::<Q, S>::new(), args)
            .await
            .map_err(|e| ConsumerError::Spawn(e.to_string()))?;

        tracing::info!("Consumer pool started with {} workers", workers);

        Ok(Self {
            supervisor,
            handle,
            shutdown,
            events,
        })
    }

    /// Subscribe to worker and message events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.events.subscribe()
    }

    /// Number of live workers.
    pub async fn worker_count(&self) -> Result<usize, ConsumerError> {
        match ractor::rpc::call(
            &self.supervisor,
            |reply| SupervisorMessage::WorkerCount { reply },
            Some(std::time::Duration::from_secs(5)),
        )
        .await
        {
            Ok(CallResult::Success(count)) => Ok(count),
            Ok(_) => Err(ConsumerError::Unavailable("no reply".into())),
            Err(e) => Err(ConsumerError::Unavailable(e.to_string())),
        }
    }

    /// Stop polling and wait for every in-flight message to finish.
    pub async fn shutdown(self) -> Result<(), ConsumerError> {
        tracing::info!("Stopping consumer pool");
        self.shutdown.cancel();

        match ractor::rpc::call(
            &self.supervisor,
            |reply| SupervisorMessage::Shutdown { reply },
            None,
        )
        .await
        {
            Ok(CallResult::Success(())) => {}
            Ok(_) => return Err(ConsumerError::Unavailable("no reply to shutdown".into())),
            Err(e) => return Err(ConsumerError::Unavailable(e.to_string())),
        }

        self.handle
            .await
            .map_err(|e| ConsumerError::Unavailable(e.to_string()))?;

        tracing::info!("Consumer pool stopped");
        Ok(())
    }
}
