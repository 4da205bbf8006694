use {
    super::error::{PipelineError, VerificationError},
    super::id::{EventId, OrderRef},
    chrono::{DateTime, Utc},
    serde::Deserialize,
    std::fmt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CheckoutSessionCompleted,
    CheckoutSessionExpired,
    CheckoutSessionAsyncPaymentSucceeded,
    CheckoutSessionAsyncPaymentFailed,
    PaymentIntentSucceeded,
    PaymentIntentPaymentFailed,
    Unknown,
}

impl EventKind {
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "checkout.session.expired" => Self::CheckoutSessionExpired,
            "checkout.session.async_payment_succeeded" => {
                Self::CheckoutSessionAsyncPaymentSucceeded
            }
            "checkout.session.async_payment_failed" => Self::CheckoutSessionAsyncPaymentFailed,
            "payment_intent.succeeded" => Self::PaymentIntentSucceeded,
            "payment_intent.payment_failed" => Self::PaymentIntentPaymentFailed,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckoutSessionCompleted => "checkout.session.completed",
            Self::CheckoutSessionExpired => "checkout.session.expired",
            Self::CheckoutSessionAsyncPaymentSucceeded => "checkout.session.async_payment_succeeded",
            Self::CheckoutSessionAsyncPaymentFailed => "checkout.session.async_payment_failed",
            Self::PaymentIntentSucceeded => "payment_intent.succeeded",
            Self::PaymentIntentPaymentFailed => "payment_intent.payment_failed",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    livemode: bool,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

/// A verified provider event. Built once on receipt and never mutated.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    id: EventId,
    kind: EventKind,
    event_type: String,
    payload: serde_json::Value,
    created: i64,
    livemode: bool,
    received_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn new(
        id: EventId,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        created: i64,
        livemode: bool,
        received_at: DateTime<Utc>,
    ) -> Self {
        let event_type = event_type.into();
        Self {
            id,
            kind: EventKind::from_type(&event_type),
            event_type,
            payload,
            created,
            livemode,
            received_at,
        }
    }

    /// Parse the exact bytes the provider signed. Only called after the
    /// signature has been checked.
    pub fn parse(raw_body: &[u8], received_at: DateTime<Utc>) -> Result<Self, VerificationError> {
        let raw: RawEvent =
            serde_json::from_slice(raw_body).map_err(|_| VerificationError::BadFormat)?;
        let id = EventId::new(raw.id).map_err(|_| VerificationError::BadFormat)?;
        Ok(Self::new(
            id,
            raw.event_type,
            raw.data.object,
            raw.created,
            raw.livemode,
            received_at,
        ))
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// `data.object` of the event.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn created(&self) -> i64 {
        self.created
    }

    pub fn livemode(&self) -> bool {
        self.livemode
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Order the event refers to: `metadata.order_id`, then
    /// `client_reference_id`, then a bare `orderId`.
    pub fn order_ref(&self) -> Result<OrderRef, PipelineError> {
        let candidate = self
            .payload
            .pointer("/metadata/order_id")
            .and_then(|v| v.as_str())
            .or_else(|| {
                self.payload
                    .get("client_reference_id")
                    .and_then(|v| v.as_str())
            })
            .or_else(|| self.payload.get("orderId").and_then(|v| v.as_str()));

        match candidate {
            Some(id) => OrderRef::new(id),
            None => Err(PipelineError::Validation(format!(
                "{} carries no order reference",
                self.event_type
            ))),
        }
    }

    /// Checkout `payment_status` (`paid`, `unpaid`, `no_payment_required`).
    pub fn payment_status(&self) -> Option<&str> {
        self.payload.get("payment_status").and_then(|v| v.as_str())
    }
}
