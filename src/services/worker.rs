use {
    super::fulfillment::FulfillmentExecutor,
    crate::domain::{
        error::{FulfillmentError, PipelineError},
        ledger::{IdempotencyLedger, Outcome},
    },
    crate::infra::postgres::job_repo::{self, JobState},
    chrono::{Duration, Utc},
    sqlx::PgPool,
    std::sync::Arc,
    tokio::sync::watch,
};

/// Poll for deferred fulfillment jobs and run them.
pub async fn run_worker(
    pool: PgPool,
    executor: FulfillmentExecutor,
    ledger: Arc<dyn IdempotencyLedger>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("fulfillment worker started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("fulfillment worker shutting down");
                return;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
        }

        if let Err(e) = poll_once(&pool, &executor, &*ledger).await {
            tracing::error!(error = %e, "worker poll error");
        }
    }
}

pub async fn poll_once(
    pool: &PgPool,
    executor: &FulfillmentExecutor,
    ledger: &dyn IdempotencyLedger,
) -> Result<(), PipelineError> {
    let mut tx = pool.begin().await?;
    let jobs = job_repo::claim(&mut tx, 10).await?;
    tx.commit().await?;

    for job in jobs {
        let event = match job.to_event() {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(job_id = %job.id, event_id = %job.event_id, error = %e, "unreadable job, completing as garbage");
                job_repo::complete(pool, job.id).await?;
                continue;
            }
        };

        match executor.execute(&event).await {
            Ok(applied) => {
                tracing::info!(job_id = %job.id, event_id = %event.id(), ?applied, "job processed");
                ledger.mark_outcome(event.id(), Outcome::Succeeded).await?;
                job_repo::complete(pool, job.id).await?;
            }
            Err(FulfillmentError::InvalidState(msg)) => {
                tracing::warn!(job_id = %job.id, error = %msg, "invalid state, completing (no retry)");
                ledger.mark_outcome(event.id(), Outcome::Succeeded).await?;
                job_repo::complete(pool, job.id).await?;
            }
            Err(e) => match job_repo::fail(pool, job.id, &e.to_string()).await? {
                JobState::Retrying => {
                    tracing::warn!(job_id = %job.id, attempts = job.attempts + 1, error = %e, "job failed, scheduling retry");
                }
                JobState::Failed => {
                    tracing::error!(job_id = %job.id, error = %e, "job out of attempts, releasing reservation");
                    ledger.mark_outcome(event.id(), Outcome::Failed).await?;
                }
            },
        }
    }

    Ok(())
}

/// Periodically reset stuck jobs and drop ledger records and finished jobs
/// past retention.
pub async fn run_reaper(
    pool: Option<PgPool>,
    ledger: Arc<dyn IdempotencyLedger>,
    retention: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("reaper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("reaper shutting down");
                return;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(60)) => {}
        }

        let cutoff = Utc::now() - retention;

        if let Some(pool) = &pool {
            match job_repo::reap_stale(pool).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(count = n, "reaped stale jobs"),
                Err(e) => tracing::error!(error = %e, "job reaper error"),
            }
            match job_repo::purge_finished(pool, cutoff).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(count = n, "purged finished jobs"),
                Err(e) => tracing::error!(error = %e, "job purge error"),
            }
        }

        match ledger.purge_expired(cutoff).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "purged expired ledger records"),
            Err(e) => tracing::error!(error = %e, "ledger purge error"),
        }
    }
}
