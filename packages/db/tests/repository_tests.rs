#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::time::Duration;

use batch_core::{JobId, JobRecord, JobStatus};
use chrono::{DateTime, Utc};
use db::{CasOutcome, DbError, JobStore};

#[tokio::test]
async fn create_get_and_list() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;

    let first = JobRecord::new("thumbnail batch 1");
    let second = JobRecord::new("thumbnail batch 2");
    let created = repo.create(&first).await?;
    assert_eq!(created, first);
    repo.create(&second).await?;

    let loaded = repo.get(first.id).await?.expect("job should exist");
    assert_eq!(loaded.description, "thumbnail batch 1");
    assert_eq!(loaded.status, JobStatus::Pending);
    assert_eq!(loaded.created_at, first.created_at);

    assert!(repo.get(JobId::new()).await?.is_none());

    let listed = repo.list(10).await?;
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|j| j.id == first.id));
    assert!(listed.iter().any(|j| j.id == second.id));

    let limited = repo.list(1).await?;
    assert_eq!(limited.len(), 1);

    let duplicate = repo.create(&first).await;
    assert!(duplicate.is_err());

    Ok(())
}

fn created_at(raw: &str) -> Result<DateTime<Utc>, Box<dyn Error>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

#[tokio::test]
async fn list_orders_by_creation_instant() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;

    // Fraction digits differ, so a text comparison would put these the
    // wrong way round.
    let older = JobRecord {
        created_at: created_at("2026-03-01T10:15:20.123Z")?,
        ..JobRecord::new("older")
    };
    let newer = JobRecord {
        created_at: created_at("2026-03-01T10:15:20.123456789Z")?,
        ..JobRecord::new("newer")
    };
    let oldest = JobRecord {
        created_at: created_at("2026-02-28T23:59:59Z")?,
        ..JobRecord::new("oldest")
    };
    repo.create(&older).await?;
    repo.create(&newer).await?;
    repo.create(&oldest).await?;

    let listed: Vec<String> = repo
        .list(10)
        .await?
        .into_iter()
        .map(|j| j.description)
        .collect();
    assert_eq!(listed, vec!["newer", "older", "oldest"]);

    let loaded = repo.get(newer.id).await?.expect("job should exist");
    assert_eq!(loaded.created_at, newer.created_at);

    Ok(())
}

#[tokio::test]
async fn get_status_reports_missing_records_as_none() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;

    assert_eq!(repo.get_status(JobId::new()).await?, None);

    let job = JobRecord::new("ocr");
    repo.create(&job).await?;
    assert_eq!(repo.get_status(job.id).await?, Some(JobStatus::Pending));

    Ok(())
}

#[tokio::test]
async fn conditional_set_applies_only_on_match() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;
    let job = JobRecord::new("encode");
    repo.create(&job).await?;

    let applied = repo
        .conditional_set_status(job.id, JobStatus::Pending, JobStatus::Completed)
        .await?;
    assert_eq!(applied, CasOutcome::Applied);
    assert_eq!(repo.get_status(job.id).await?, Some(JobStatus::Completed));

    // Stale expectation: the record is no longer Pending.
    let conflict = repo
        .conditional_set_status(job.id, JobStatus::Pending, JobStatus::Failed)
        .await?;
    assert_eq!(conflict, CasOutcome::Conflict);
    assert_eq!(repo.get_status(job.id).await?, Some(JobStatus::Completed));

    Ok(())
}

#[tokio::test]
async fn conditional_set_on_missing_record_is_a_conflict() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;
    let id = JobId::new();

    let outcome = repo
        .conditional_set_status(id, JobStatus::Pending, JobStatus::Completed)
        .await?;
    assert_eq!(outcome, CasOutcome::Conflict);

    // The write must not have created anything.
    assert!(repo.get(id).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn conditional_set_rejects_non_monotonic_transitions() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;
    let job = JobRecord::new("archive");
    repo.create(&job).await?;

    let result = repo
        .conditional_set_status(job.id, JobStatus::Completed, JobStatus::Pending)
        .await;
    assert!(matches!(
        result,
        Err(DbError::InvalidTransition {
            from: JobStatus::Completed,
            to: JobStatus::Pending
        })
    ));
    assert_eq!(repo.get_status(job.id).await?, Some(JobStatus::Pending));

    Ok(())
}

#[tokio::test]
async fn claim_then_finish() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;
    let job = JobRecord::new("claimed");
    repo.create(&job).await?;

    assert_eq!(
        repo.conditional_set_status(job.id, JobStatus::Pending, JobStatus::Processing)
            .await?,
        CasOutcome::Applied
    );
    // A second claim loses.
    assert_eq!(
        repo.conditional_set_status(job.id, JobStatus::Pending, JobStatus::Processing)
            .await?,
        CasOutcome::Conflict
    );
    assert_eq!(
        repo.conditional_set_status(job.id, JobStatus::Processing, JobStatus::Failed)
            .await?,
        CasOutcome::Applied
    );
    assert_eq!(repo.get_status(job.id).await?, Some(JobStatus::Failed));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transitions_have_exactly_one_winner() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;
    let job = JobRecord::new("contended");
    repo.create(&job).await?;

    let mut handles = Vec::new();
    for i in 0..16 {
        let repo = repo.clone();
        let next = if i % 2 == 0 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        handles.push(tokio::spawn(async move {
            repo.conditional_set_status(job.id, JobStatus::Pending, next)
                .await
                .map(|outcome| (outcome, next))
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        let (outcome, next) = handle.await??;
        if outcome == CasOutcome::Applied {
            winners.push(next);
        }
    }

    assert_eq!(winners.len(), 1);
    // The stored value is the winner's, and it stays put.
    let stored = repo.get_status(job.id).await?;
    assert_eq!(stored, Some(winners[0]));

    for _ in 0..3 {
        repo.conditional_set_status(job.id, JobStatus::Pending, JobStatus::Completed)
            .await?;
        assert_eq!(repo.get_status(job.id).await?, stored);
    }

    Ok(())
}

#[tokio::test]
async fn reclaim_takes_over_only_stale_claims() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;
    let job = JobRecord::new("abandoned");
    repo.create(&job).await?;

    // Not claimed yet.
    let cutoff = Utc::now();
    assert_eq!(repo.reclaim_stale(job.id, cutoff).await?, CasOutcome::Conflict);

    repo.conditional_set_status(job.id, JobStatus::Pending, JobStatus::Processing)
        .await?;

    // Claimed after the cutoff, so the claim is still live.
    assert_eq!(repo.reclaim_stale(job.id, cutoff).await?, CasOutcome::Conflict);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let cutoff = Utc::now();
    assert_eq!(repo.reclaim_stale(job.id, cutoff).await?, CasOutcome::Applied);
    assert_eq!(repo.get_status(job.id).await?, Some(JobStatus::Processing));

    // The takeover refreshed the claim.
    assert_eq!(repo.reclaim_stale(job.id, cutoff).await?, CasOutcome::Conflict);

    repo.conditional_set_status(job.id, JobStatus::Processing, JobStatus::Completed)
        .await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        repo.reclaim_stale(job.id, Utc::now()).await?,
        CasOutcome::Conflict
    );
    assert_eq!(repo.get_status(job.id).await?, Some(JobStatus::Completed));

    assert_eq!(
        repo.reclaim_stale(JobId::new(), Utc::now()).await?,
        CasOutcome::Conflict
    );

    Ok(())
}
