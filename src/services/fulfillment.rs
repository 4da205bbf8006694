use {
    crate::domain::{
        error::FulfillmentError,
        event::WebhookEvent,
        fulfillment::{Applied, FulfillmentEffect, FulfillmentStore},
    },
    std::sync::Arc,
};

/// Applies the business effect for an event. Holds no state of its own;
/// idempotency at the effect layer comes from the store's state machine.
#[derive(Clone)]
pub struct FulfillmentExecutor {
    store: Arc<dyn FulfillmentStore>,
}

impl FulfillmentExecutor {
    pub fn new(store: Arc<dyn FulfillmentStore>) -> Self {
        Self { store }
    }

    pub async fn execute(&self, event: &WebhookEvent) -> Result<Applied, FulfillmentError> {
        let Some(effect) = FulfillmentEffect::for_event(event) else {
            tracing::info!(event_type = %event.event_type(), "no fulfillment effect for event");
            return Ok(Applied::NoEffect);
        };

        let order = event
            .order_ref()
            .map_err(|e| FulfillmentError::InvalidState(e.to_string()))?;

        let applied = self.store.apply(&order, effect, event.id()).await?;
        match applied {
            Applied::Changed { from, to } => {
                tracing::info!(order_id = %order, %from, %to, effect = effect.as_str(), "order fulfilled");
            }
            Applied::Unchanged(status) => {
                tracing::info!(order_id = %order, %status, effect = effect.as_str(), "order already in target state");
            }
            Applied::NoEffect => {}
        }
        Ok(applied)
    }
}
