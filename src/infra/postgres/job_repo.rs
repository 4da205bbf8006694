use {
    crate::domain::{
        error::PipelineError,
        event::WebhookEvent,
        fulfillment::FulfillmentQueue,
        id::EventId,
        ledger::BoxFuture,
    },
    chrono::{DateTime, Utc},
    sqlx::{PgPool, Postgres, Row, Transaction},
    uuid::Uuid,
};

pub struct JobRow {
    pub id: Uuid,
    pub event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub provider_ts: i64,
    pub livemode: bool,
    pub received_at: DateTime<Utc>,
    pub attempts: i32,
}

impl JobRow {
    pub fn to_event(&self) -> Result<WebhookEvent, PipelineError> {
        Ok(WebhookEvent::new(
            EventId::new(&self.event_id)?,
            &self.event_type,
            self.payload.clone(),
            self.provider_ts,
            self.livemode,
            self.received_at,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Rescheduled with backoff.
    Retrying,
    /// Out of attempts.
    Failed,
}

/// Enqueue a reserved event for async fulfillment. A finished job for the
/// same event is reset to pending, since the ledger only admits an event
/// again when its last attempt failed or was forgotten.
/// Returns `true` if the job is runnable, `false` if a live job already exists.
pub async fn enqueue(pool: &PgPool, event: &WebhookEvent) -> Result<bool, PipelineError> {
    let inserted: Option<bool> = sqlx::query_scalar(
        r#"
        INSERT INTO fulfillment_jobs
            (id, event_id, event_type, payload, provider_ts, livemode, received_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (event_id) DO UPDATE
        SET status = 'pending',
            attempts = 0,
            last_error = NULL,
            payload = EXCLUDED.payload,
            received_at = EXCLUDED.received_at,
            scheduled_at = now(),
            updated_at = now()
        WHERE fulfillment_jobs.status IN ('failed', 'completed')
        RETURNING true
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(event.id().as_str())
    .bind(event.event_type())
    .bind(event.payload())
    .bind(event.created())
    .bind(event.livemode())
    .bind(event.received_at())
    .fetch_optional(pool)
    .await?;

    Ok(inserted.is_some())
}

/// Claim up to `limit` pending jobs for processing.
/// Uses SKIP LOCKED to avoid contention with other workers.
pub async fn claim(
    tx: &mut Transaction<'_, Postgres>,
    limit: i64,
) -> Result<Vec<JobRow>, PipelineError> {
    let rows = sqlx::query(
        r#"
        UPDATE fulfillment_jobs
        SET status = 'processing', updated_at = now()
        WHERE id IN (
            SELECT id FROM fulfillment_jobs
            WHERE status = 'pending' AND scheduled_at <= now()
            ORDER BY scheduled_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, event_id, event_type, payload, provider_ts, livemode, received_at, attempts
        "#,
    )
    .bind(limit)
    .fetch_all(&mut **tx)
    .await?;

    rows.into_iter()
        .map(|row| -> Result<JobRow, PipelineError> {
            Ok(JobRow {
                id: row.try_get("id")?,
                event_id: row.try_get("event_id")?,
                event_type: row.try_get("event_type")?,
                payload: row.try_get("payload")?,
                provider_ts: row.try_get("provider_ts")?,
                livemode: row.try_get("livemode")?,
                received_at: row.try_get("received_at")?,
                attempts: row.try_get("attempts")?,
            })
        })
        .collect()
}

pub async fn complete(pool: &PgPool, id: Uuid) -> Result<(), PipelineError> {
    sqlx::query(
        "UPDATE fulfillment_jobs SET status = 'completed', updated_at = now() WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failure. Exponential backoff via scheduled_at.
/// If max attempts reached, mark as 'failed' permanently.
pub async fn fail(pool: &PgPool, id: Uuid, error: &str) -> Result<JobState, PipelineError> {
    let status: String = sqlx::query_scalar(
        r#"
        UPDATE fulfillment_jobs
        SET attempts = attempts + 1,
            last_error = $2,
            status = CASE
                WHEN attempts + 1 >= max_attempts THEN 'failed'
                ELSE 'pending'
            END,
            scheduled_at = CASE
                WHEN attempts + 1 >= max_attempts THEN scheduled_at
                ELSE now() + make_interval(secs => power(2, attempts + 1)::int)
            END,
            updated_at = now()
        WHERE id = $1
        RETURNING status
        "#,
    )
    .bind(id)
    .bind(error)
    .fetch_one(pool)
    .await?;

    Ok(if status == "failed" {
        JobState::Failed
    } else {
        JobState::Retrying
    })
}

/// Reset jobs stuck in 'processing' for >2 minutes back to 'pending'.
/// Returns the number of reaped jobs.
pub async fn reap_stale(pool: &PgPool) -> Result<u64, PipelineError> {
    let result = sqlx::query(
        r#"
        UPDATE fulfillment_jobs
        SET status = 'pending', updated_at = now()
        WHERE status = 'processing' AND updated_at < now() - interval '2 minutes'
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Delete completed and failed jobs last touched before `older_than`.
pub async fn purge_finished(pool: &PgPool, older_than: DateTime<Utc>) -> Result<u64, PipelineError> {
    let result = sqlx::query(
        r#"
        DELETE FROM fulfillment_jobs
        WHERE status IN ('completed', 'failed') AND updated_at < $1
        "#,
    )
    .bind(older_than)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl FulfillmentQueue for PgJobQueue {
    fn enqueue<'a>(&'a self, event: &'a WebhookEvent) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(enqueue(&self.pool, event))
    }
}
