//! Core domain types for the batch job system.
//!
//! This crate contains shared types used across all packages:
//! - JobRecord and JobStatus for durable job state
//! - JobMessage, the queue payload referencing a job
//! - Dispositions and events describing what the consumer did
//! - Environment configuration helpers

pub mod env;
mod events;
mod job;
mod message;

pub use env::ConfigError;
pub use events::{ConsumerEvent, Disposition};
pub use job::{JobId, JobRecord, JobStatus};
pub use message::JobMessage;
