//! Supervisor actor owning the consumer workers.

use std::collections::HashMap;
use std::marker::PhantomData;

use batch_core::ConsumerEvent;
use broker::MessageQueue;
use chrono::Utc;
use db::JobStore;
use ractor::concurrency::JoinHandle;
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio_util::sync::CancellationToken;

use crate::messages::{SupervisorMessage, WorkerMessage};
use crate::pipeline::Pipeline;
use crate::worker_actor::{ConsumerWorker, WorkerArgs};

struct WorkerHandle {
    worker_id: String,
    actor: ActorRef<WorkerMessage>,
    handle: JoinHandle<()>,
}

/// State for the supervisor actor.
pub struct SupervisorState<Q, S> {
    pipeline: Pipeline<Q, S>,
    shutdown: CancellationToken,
    /// Live workers by actor ID.
    workers: HashMap<ActorId, WorkerHandle>,
    /// Worker count to keep alive.
    target: usize,
}

/// Supervisor arguments.
pub struct SupervisorArgs<Q, S> {
    pub pipeline: Pipeline<Q, S>,
    pub workers: usize,
    pub shutdown: CancellationToken,
}

/// Spawns the worker pool, replaces workers that fail, and stops them all
/// on shutdown.
pub struct ConsumerSupervisor<Q, S> {
    _marker: PhantomData<fn() -> (Q, S)>,
}

impl<Q, S> ConsumerSupervisor<Q, S> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<Q, S> Default for ConsumerSupervisor<Q, S> {
    fn default() -> Self {
        Self::new()
    }
}

async fn spawn_worker<Q, S>(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState<Q, S>,
    worker_id: String,
) -> Result<(), ActorProcessingErr>
where
    Q: MessageQueue,
    S: JobStore,
{
    let args = WorkerArgs {
        worker_id: worker_id.clone(),
        pipeline: state.pipeline.clone(),
        shutdown: state.shutdown.clone(),
    };

    let (actor, handle) =
        Actor::spawn_linked(None, ConsumerWorker::<Q, S>::new(), args, myself.get_cell())
            .await
            .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    state.workers.insert(
        actor.get_id(),
        WorkerHandle {
            worker_id,
            actor,
            handle,
        },
    );
    Ok(())
}

impl<Q, S> Actor for ConsumerSupervisor<Q, S>
where
    Q: MessageQueue,
    S: JobStore,
{
    type Msg = SupervisorMessage;
    type State = SupervisorState<Q, S>;
    type Arguments = SupervisorArgs<Q, S>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting consumer supervisor with {} workers", args.workers);

        Ok(SupervisorState {
            pipeline: args.pipeline,
            shutdown: args.shutdown,
            workers: HashMap::new(),
            target: args.workers,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for n in 1..=state.target {
            spawn_worker(&myself, state, format!("worker-{}", n)).await?;
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::WorkerCount { reply } => {
                let _ = reply.send(state.workers.len());
            }

            SupervisorMessage::Shutdown { reply } => {
                tracing::info!("Shutting down consumer supervisor");
                state.shutdown.cancel();

                for (_, worker) in state.workers.drain() {
                    let _ = worker.actor.send_message(WorkerMessage::Shutdown);
                    if let Err(e) = worker.handle.await {
                        tracing::warn!("Worker {} did not stop cleanly: {}", worker.worker_id, e);
                    }
                }

                let _ = reply.send(());
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorFailed(cell, error) => {
                let Some(failed) = state.workers.remove(&cell.get_id()) else {
                    return Ok(());
                };
                tracing::error!(
                    worker_id = %failed.worker_id,
                    error = %error,
                    "Consumer worker failed"
                );
                if state.shutdown.is_cancelled() {
                    return Ok(());
                }

                let worker_id = failed.worker_id;
                match spawn_worker(&myself, state, worker_id.clone()).await {
                    Ok(()) => state.pipeline.emit(ConsumerEvent::WorkerRestarted {
                        worker_id,
                        reason: error.to_string(),
                        timestamp: Utc::now(),
                    }),
                    Err(e) => tracing::error!("Failed to restart worker {}: {}", worker_id, e),
                }
            }

            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                if let Some(stopped) = state.workers.remove(&cell.get_id())
                    && !state.shutdown.is_cancelled()
                {
                    tracing::warn!(
                        "Consumer worker {} terminated: {:?}",
                        stopped.worker_id,
                        reason
                    );
                }
            }

            _ => {}
        }

        Ok(())
    }
}
