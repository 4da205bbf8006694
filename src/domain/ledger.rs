use {
    super::error::PipelineError,
    super::id::EventId,
    chrono::{DateTime, Duration, Utc},
    serde::Serialize,
    std::{fmt, future::Future, pin::Pin},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Outcome {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(PipelineError::Validation(format!(
                "unknown ledger outcome: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Caller owns the event and must call `mark_outcome` when done.
    Reserved,
    /// Someone else finished (or is still working on) this event.
    AlreadyProcessed,
}

/// One row per event id. `outcome == None` while a reservation is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedEventRecord {
    pub event_id: EventId,
    pub event_kind: String,
    pub outcome: Option<Outcome>,
    pub attempts: i32,
    pub reserved_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ProcessedEventRecord {
    pub fn reserved(event_id: EventId, event_kind: &str, now: DateTime<Utc>) -> Self {
        Self {
            event_id,
            event_kind: event_kind.to_string(),
            outcome: None,
            attempts: 1,
            reserved_at: now,
            processed_at: None,
        }
    }

    /// A failed event may be retried. An in-flight reservation older than
    /// `lease` is treated as abandoned. Succeeded is final.
    pub fn is_reclaimable(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        match self.outcome {
            Some(Outcome::Succeeded) => false,
            Some(Outcome::Failed) => true,
            None => self.reserved_at + lease < now,
        }
    }

    pub fn reclaim(&mut self, now: DateTime<Utc>) {
        self.outcome = None;
        self.reserved_at = now;
        self.processed_at = None;
        self.attempts += 1;
    }

    /// Record how the attempt ended. A succeeded record is final, so a late
    /// mark from a holder whose lease was reclaimed is dropped. Returns
    /// whether the record changed.
    pub fn settle(&mut self, outcome: Outcome, now: DateTime<Utc>) -> bool {
        if self.outcome == Some(Outcome::Succeeded) {
            return false;
        }
        self.outcome = Some(outcome);
        self.processed_at = Some(now);
        true
    }

    pub fn is_expired(&self, older_than: DateTime<Utc>) -> bool {
        match (self.outcome, self.processed_at) {
            (Some(_), Some(processed_at)) => processed_at < older_than,
            _ => false,
        }
    }
}

pub trait IdempotencyLedger: Send + Sync {
    /// Atomically claim `event_id`. Concurrent callers for the same id get
    /// exactly one `Reserved`.
    fn check_and_reserve<'a>(
        &'a self,
        event_id: &'a EventId,
        event_kind: &'a str,
    ) -> BoxFuture<'a, Result<Reservation, PipelineError>>;

    fn mark_outcome<'a>(
        &'a self,
        event_id: &'a EventId,
        outcome: Outcome,
    ) -> BoxFuture<'a, Result<(), PipelineError>>;

    fn get<'a>(
        &'a self,
        event_id: &'a EventId,
    ) -> BoxFuture<'a, Result<Option<ProcessedEventRecord>, PipelineError>>;

    /// Drop finished records processed before `older_than`. Returns the count.
    fn purge_expired(&self, older_than: DateTime<Utc>) -> BoxFuture<'_, Result<u64, PipelineError>>;
}
