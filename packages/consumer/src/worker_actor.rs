//! Worker actor that drives the pipeline in a loop.

use std::marker::PhantomData;

use batch_core::ConsumerEvent;
use broker::MessageQueue;
use chrono::Utc;
use db::JobStore;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio_util::sync::CancellationToken;

use crate::messages::WorkerMessage;
use crate::pipeline::Pipeline;

/// State for the worker actor.
pub struct WorkerState<Q, S> {
    /// Unique worker ID.
    pub worker_id: String,
    pub pipeline: Pipeline<Q, S>,
    /// Cancelled when the pool shuts down.
    pub shutdown: CancellationToken,
    /// Messages handled so far.
    pub handled: u64,
}

/// Worker actor arguments.
pub struct WorkerArgs<Q, S> {
    pub worker_id: String,
    pub pipeline: Pipeline<Q, S>,
    pub shutdown: CancellationToken,
}

/// Worker actor: receive, handle, repeat until shutdown.
pub struct ConsumerWorker<Q, S> {
    _marker: PhantomData<fn() -> (Q, S)>,
}

impl<Q, S> ConsumerWorker<Q, S> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<Q, S> Default for ConsumerWorker<Q, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q, S> Actor for ConsumerWorker<Q, S>
where
    Q: MessageQueue,
    S: JobStore,
{
    type Msg = WorkerMessage;
    type State = WorkerState<Q, S>;
    type Arguments = WorkerArgs<Q, S>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting consumer worker: {}", args.worker_id);

        Ok(WorkerState {
            worker_id: args.worker_id,
            pipeline: args.pipeline,
            shutdown: args.shutdown,
            handled: 0,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.pipeline.emit(ConsumerEvent::WorkerStarted {
            worker_id: state.worker_id.clone(),
            timestamp: Utc::now(),
        });

        // Start the work loop
        myself.send_message(WorkerMessage::Poll)?;
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            "Consumer worker {} stopped after {} messages",
            state.worker_id,
            state.handled
        );
        state.pipeline.emit(ConsumerEvent::WorkerStopped {
            worker_id: state.worker_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if state.shutdown.is_cancelled() {
                    myself.stop(None);
                    return Ok(());
                }

                // Nothing has been taken from the queue while the receive is
                // pending, so it is safe to abandon on shutdown.
                let received = tokio::select! {
                    _ = state.shutdown.cancelled() => {
                        myself.stop(None);
                        return Ok(());
                    }
                    result = state.pipeline.receive() => result,
                };

                match received {
                    Ok(messages) => {
                        if messages.is_empty() {
                            tracing::debug!(worker_id = %state.worker_id, "No messages received");
                        }

                        for (index, message) in messages.iter().enumerate() {
                            if state.shutdown.is_cancelled() {
                                tracing::info!(
                                    worker_id = %state.worker_id,
                                    remaining = messages.len() - index,
                                    "Shutdown requested, leaving remaining messages for redelivery"
                                );
                                break;
                            }
                            state.pipeline.handle(&state.worker_id, message).await;
                            state.handled += 1;
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            worker_id = %state.worker_id,
                            error = %e,
                            "Failed to receive messages"
                        );
                        let backoff = state.pipeline.config().error_backoff;
                        tokio::select! {
                            _ = state.shutdown.cancelled() => {}
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                }

                myself.send_message(WorkerMessage::Poll)?;
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down consumer worker: {}", state.worker_id);
                myself.stop(None);
            }
        }

        Ok(())
    }
}
