//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
///
/// Timestamps are native datetimes so ordering and the claim lease compare
/// instants rather than text.
const JOB_SCHEMA: &str = r#"
-- Job table holding the authoritative status of every submitted job
DEFINE TABLE IF NOT EXISTS job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS description ON job TYPE string;
DEFINE FIELD IF NOT EXISTS status ON job TYPE string
    ASSERT $value INSIDE ["Pending", "Processing", "Completed", "Failed"];
DEFINE FIELD IF NOT EXISTS created_at ON job TYPE datetime;
DEFINE FIELD IF NOT EXISTS updated_at ON job TYPE datetime;

-- Indexes for listing and status queries
DEFINE INDEX IF NOT EXISTS job_status ON job FIELDS status;
DEFINE INDEX IF NOT EXISTS job_created ON job FIELDS created_at;
"#;
