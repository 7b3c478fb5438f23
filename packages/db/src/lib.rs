//! SurrealDB integration for the batch job system.
//!
//! This crate provides the job store: a connection handle owned by the
//! caller, the job table schema, and the [`JobStore`] contract the consumer
//! pipeline depends on.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage
//! - `remote`: Connect to a SurrealDB server over WebSocket

mod connection;
mod schema;
mod store;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use repositories::JobRepository;
pub use schema::init_schema;
pub use store::{CasOutcome, JobStore};

/// Connect to the database and make sure the schema exists.
///
/// This should be called once at application startup; the returned handle
/// is cloned into every component that needs it.
pub async fn init(config: &DbConfig) -> Result<Database, DbError> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}
