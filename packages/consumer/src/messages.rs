//! Message types for the consumer actors.

use ractor::RpcReplyPort;

/// Messages for a consumer worker.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Receive and handle the next batch, then poll again.
    Poll,

    /// Stop after the current batch.
    Shutdown,
}

/// Messages for the consumer supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Number of live workers.
    WorkerCount { reply: RpcReplyPort<usize> },

    /// Stop all workers, waiting for in-flight messages to finish.
    Shutdown { reply: RpcReplyPort<()> },
}
