//! Job consumer pipeline.
//!
//! Workers receive job messages, skip duplicates and unknown jobs, run the
//! job's work, record the outcome with a conditional status write, and
//! acknowledge the message only once that is safe.
//!
//! # Architecture
//!
//! - `Pipeline` - the per-message state machine, shared by all workers
//! - `ConsumerWorker` - actor looping receive → handle until shutdown
//! - `ConsumerSupervisor` - spawns the workers and replaces failed ones
//! - `ConsumerPool` - handle for starting, observing and stopping the pool
//! - `JobSubmitter` - producer side, creates and publishes jobs
//!
//! # Usage
//!
//! ```ignore
//! let pool = ConsumerPool::start(queue, repo, executor, ConsumerConfig::from_env()?).await?;
//! let mut events = pool.subscribe();
//! // ...
//! pool.shutdown().await?;
//! ```

mod config;
mod executor;
pub mod guard;
mod messages;
mod pipeline;
mod pool;
mod producer;
mod supervisor;
pub mod transition;
mod worker_actor;

pub use config::{ConflictPolicy, ConsumerConfig, MAX_RECEIVE_BATCH, MAX_RECEIVE_WAIT};
pub use executor::{
    Execution, ExecutionFuture, FnExecutor, JobExecutor, Outcome, SIMULATED_FAILURE_PREFIX,
    SimulatedExecutor, run_executor,
};
pub use guard::GuardDecision;
pub use messages::{SupervisorMessage, WorkerMessage};
pub use pipeline::{Pipeline, ProcessError};
pub use pool::{ConsumerError, ConsumerPool};
pub use producer::{JobSubmitter, SubmitError};
pub use supervisor::{ConsumerSupervisor, SupervisorArgs};
pub use worker_actor::{ConsumerWorker, WorkerArgs};
