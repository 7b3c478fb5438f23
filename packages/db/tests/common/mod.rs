use db::{DbConfig, DbError, JobRepository};

/// Each call gets its own in-memory datastore.
pub async fn setup_repo() -> Result<JobRepository, DbError> {
    let db = db::init(&DbConfig::memory()).await?;
    Ok(JobRepository::new(db))
}
