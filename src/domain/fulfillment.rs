use {
    super::error::{FulfillmentError, PipelineError},
    super::event::{EventKind, WebhookEvent},
    super::id::{EventId, OrderRef},
    super::ledger::BoxFuture,
    super::order::OrderStatus,
};

/// The single business effect an event kind maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentEffect {
    /// Mark completed, grant entitlements, release holds.
    Complete,
    /// Mark expired, release holds.
    Expire,
    /// Mark payment_failed and record a notice for the customer.
    FlagPaymentFailed,
}

impl FulfillmentEffect {
    /// `None` when the event needs no effect (unknown kind, or a checkout
    /// that completed but is still waiting on an async payment).
    pub fn for_event(event: &WebhookEvent) -> Option<Self> {
        match event.kind() {
            EventKind::CheckoutSessionCompleted => match event.payment_status() {
                Some("unpaid") => None,
                _ => Some(Self::Complete),
            },
            EventKind::CheckoutSessionAsyncPaymentSucceeded
            | EventKind::PaymentIntentSucceeded => Some(Self::Complete),
            EventKind::CheckoutSessionExpired => Some(Self::Expire),
            EventKind::CheckoutSessionAsyncPaymentFailed
            | EventKind::PaymentIntentPaymentFailed => Some(Self::FlagPaymentFailed),
            EventKind::Unknown => None,
        }
    }

    pub fn target_status(&self) -> OrderStatus {
        match self {
            Self::Complete => OrderStatus::Completed,
            Self::Expire => OrderStatus::Expired,
            Self::FlagPaymentFailed => OrderStatus::PaymentFailed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Expire => "expire",
            Self::FlagPaymentFailed => "flag_payment_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed { from: OrderStatus, to: OrderStatus },
    /// Order was already in the target state.
    Unchanged(OrderStatus),
    /// Event needed no effect.
    NoEffect,
}

/// Storefront-side capability that applies an effect to an order. One
/// call is atomic for that order.
pub trait FulfillmentStore: Send + Sync {
    fn apply<'a>(
        &'a self,
        order: &'a OrderRef,
        effect: FulfillmentEffect,
        event_id: &'a EventId,
    ) -> BoxFuture<'a, Result<Applied, FulfillmentError>>;
}

/// Where reserved events go when fulfillment runs outside the request.
pub trait FulfillmentQueue: Send + Sync {
    /// Returns `false` if the event was already queued.
    fn enqueue<'a>(
        &'a self,
        event: &'a WebhookEvent,
    ) -> BoxFuture<'a, Result<bool, PipelineError>>;
}
