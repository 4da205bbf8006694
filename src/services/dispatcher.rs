use {
    super::fulfillment::FulfillmentExecutor,
    crate::domain::{
        error::{FulfillmentError, PipelineError},
        event::WebhookEvent,
        fulfillment::{Applied, FulfillmentQueue},
        ledger::{IdempotencyLedger, Outcome, Reservation},
    },
    std::sync::Arc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Kind we deliberately do not handle.
    Ignored,
    /// Ledger already holds this event.
    Duplicate,
    Fulfilled(Applied),
    /// Reserved and queued; a worker will fulfill it.
    Deferred,
    /// Order could not take the effect. Acknowledged so the provider stops retrying.
    SkippedInvalidState,
}

impl DispatchOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Duplicate => "duplicate",
            Self::Fulfilled(_) => "processed",
            Self::Deferred => "accepted",
            Self::SkippedInvalidState => "ignored_invalid_state",
        }
    }
}

/// Routes a verified event through the ledger to fulfillment.
#[derive(Clone)]
pub struct Dispatcher {
    ledger: Arc<dyn IdempotencyLedger>,
    executor: FulfillmentExecutor,
    queue: Option<Arc<dyn FulfillmentQueue>>,
}

impl Dispatcher {
    pub fn new(ledger: Arc<dyn IdempotencyLedger>, executor: FulfillmentExecutor) -> Self {
        Self {
            ledger,
            executor,
            queue: None,
        }
    }

    /// Acknowledge after reservation and let `queue` carry the work.
    pub fn with_queue(mut self, queue: Arc<dyn FulfillmentQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub async fn dispatch(&self, event: &WebhookEvent) -> Result<DispatchOutcome, PipelineError> {
        if !event.kind().is_known() {
            tracing::info!(event_type = %event.event_type(), "unhandled event type, acknowledged");
            return Ok(DispatchOutcome::Ignored);
        }

        match self
            .ledger
            .check_and_reserve(event.id(), event.kind().as_str())
            .await?
        {
            Reservation::AlreadyProcessed => {
                tracing::info!(event_id = %event.id(), "duplicate event, already processed");
                return Ok(DispatchOutcome::Duplicate);
            }
            Reservation::Reserved => {}
        }

        // From here the reservation must be settled even if the caller stops
        // waiting (request timeout, dropped connection), so the work runs
        // on its own task.
        let this = self.clone();
        let owned = event.clone();
        tokio::spawn(async move { this.settle_reserved(&owned).await })
            .await
            .map_err(|e| {
                tracing::error!(event_id = %event.id(), error = %e, "fulfillment task aborted");
                FulfillmentError::DownstreamUnavailable(format!("fulfillment task aborted: {e}"))
            })?
    }

    async fn settle_reserved(&self, event: &WebhookEvent) -> Result<DispatchOutcome, PipelineError> {
        let Some(queue) = &self.queue else {
            return self.fulfill_reserved(event).await;
        };

        match queue.enqueue(event).await {
            Ok(true) => Ok(DispatchOutcome::Deferred),
            Ok(false) => {
                // A live job already owns this event; let the provider retry
                // once it has settled.
                tracing::warn!(event_id = %event.id(), "fulfillment job still in flight, releasing reservation");
                self.release(event).await;
                Err(FulfillmentError::DownstreamUnavailable(format!(
                    "fulfillment job for {} is still in flight",
                    event.id()
                ))
                .into())
            }
            Err(e) => {
                self.release(event).await;
                Err(e)
            }
        }
    }

    /// Run fulfillment for an event this caller has reserved, then record
    /// the outcome.
    pub async fn fulfill_reserved(
        &self,
        event: &WebhookEvent,
    ) -> Result<DispatchOutcome, PipelineError> {
        match self.executor.execute(event).await {
            Ok(applied) => {
                self.ledger
                    .mark_outcome(event.id(), Outcome::Succeeded)
                    .await?;
                Ok(DispatchOutcome::Fulfilled(applied))
            }
            Err(FulfillmentError::InvalidState(msg)) => {
                tracing::warn!(event_id = %event.id(), reason = %msg, "fulfillment skipped, invalid state");
                self.ledger
                    .mark_outcome(event.id(), Outcome::Succeeded)
                    .await?;
                Ok(DispatchOutcome::SkippedInvalidState)
            }
            Err(e) => {
                tracing::error!(event_id = %event.id(), error = %e, "fulfillment failed, releasing reservation");
                self.release(event).await;
                Err(e.into())
            }
        }
    }

    async fn release(&self, event: &WebhookEvent) {
        if let Err(e) = self.ledger.mark_outcome(event.id(), Outcome::Failed).await {
            tracing::error!(event_id = %event.id(), error = %e, "failed to release reservation");
        }
    }
}
