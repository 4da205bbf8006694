use {
    crate::domain::{
        error::PipelineError,
        id::EventId,
        ledger::{BoxFuture, IdempotencyLedger, Outcome, ProcessedEventRecord, Reservation},
    },
    chrono::{DateTime, Duration, Utc},
    sqlx::{PgPool, Row},
};

/// Ledger backed by the `processed_events` table. The primary key on
/// `event_id` is the only serialization point between deliveries.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
    lease: Duration,
}

impl PgLedger {
    pub fn new(pool: PgPool, lease: Duration) -> Self {
        Self { pool, lease }
    }

    async fn reserve(&self, event_id: &EventId, event_kind: &str) -> Result<Reservation, PipelineError> {
        // Insert wins on first delivery. On conflict, the row is only taken
        // over when the previous attempt failed or its lease ran out; any
        // other conflict returns no row.
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            INSERT INTO processed_events (event_id, event_kind, reserved_at)
            VALUES ($1, $2, now())
            ON CONFLICT (event_id) DO UPDATE
            SET outcome = NULL,
                reserved_at = now(),
                processed_at = NULL,
                attempts = processed_events.attempts + 1
            WHERE processed_events.outcome = 'failed'
               OR (processed_events.outcome IS NULL
                   AND processed_events.reserved_at < now() - make_interval(secs => $3))
            RETURNING attempts
            "#,
        )
        .bind(event_id.as_str())
        .bind(event_kind)
        .bind(self.lease.num_milliseconds() as f64 / 1000.0)
        .fetch_optional(&self.pool)
        .await?;

        match attempts {
            Some(n) => {
                if n > 1 {
                    tracing::info!(event_id = %event_id, attempts = n, "reclaimed reservation");
                }
                Ok(Reservation::Reserved)
            }
            None => Ok(Reservation::AlreadyProcessed),
        }
    }

    async fn mark(&self, event_id: &EventId, outcome: Outcome) -> Result<(), PipelineError> {
        // Succeeded is final. A holder whose lease was reclaimed may report
        // late; that report must not reopen the event.
        let result = sqlx::query(
            r#"
            UPDATE processed_events
            SET outcome = $2, processed_at = now()
            WHERE event_id = $1 AND outcome IS DISTINCT FROM 'succeeded'
            "#,
        )
        .bind(event_id.as_str())
        .bind(outcome.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            if self.fetch(event_id).await?.is_none() {
                return Err(PipelineError::Validation(format!(
                    "no reservation for {event_id}"
                )));
            }
            tracing::warn!(event_id = %event_id, outcome = outcome.as_str(), "event already succeeded, late outcome dropped");
        }
        Ok(())
    }

    async fn fetch(&self, event_id: &EventId) -> Result<Option<ProcessedEventRecord>, PipelineError> {
        let row = sqlx::query(
            r#"
            SELECT event_id, event_kind, outcome, attempts, reserved_at, processed_at
            FROM processed_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let outcome: Option<String> = row.try_get("outcome")?;
        Ok(Some(ProcessedEventRecord {
            event_id: EventId::new(row.try_get::<String, _>("event_id")?)?,
            event_kind: row.try_get("event_kind")?,
            outcome: outcome.as_deref().map(Outcome::try_from).transpose()?,
            attempts: row.try_get("attempts")?,
            reserved_at: row.try_get("reserved_at")?,
            processed_at: row.try_get("processed_at")?,
        }))
    }

    async fn purge(&self, older_than: DateTime<Utc>) -> Result<u64, PipelineError> {
        let result = sqlx::query(
            "DELETE FROM processed_events WHERE outcome IS NOT NULL AND processed_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

impl IdempotencyLedger for PgLedger {
    fn check_and_reserve<'a>(
        &'a self,
        event_id: &'a EventId,
        event_kind: &'a str,
    ) -> BoxFuture<'a, Result<Reservation, PipelineError>> {
        Box::pin(self.reserve(event_id, event_kind))
    }

    fn mark_outcome<'a>(
        &'a self,
        event_id: &'a EventId,
        outcome: Outcome,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(self.mark(event_id, outcome))
    }

    fn get<'a>(
        &'a self,
        event_id: &'a EventId,
    ) -> BoxFuture<'a, Result<Option<ProcessedEventRecord>, PipelineError>> {
        Box::pin(self.fetch(event_id))
    }

    fn purge_expired(&self, older_than: DateTime<Utc>) -> BoxFuture<'_, Result<u64, PipelineError>> {
        Box::pin(self.purge(older_than))
    }
}
