use {
    super::error::{FulfillmentError, PipelineError},
    super::id::OrderRef,
    serde::{Deserialize, Serialize},
    std::fmt,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Completed,
    Expired,
    PaymentFailed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::PaymentFailed => "payment_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Expired)
    }

    pub fn can_transition_to(&self, next: &OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Self::Pending, Self::Completed)
                | (Self::Pending, Self::Expired)
                | (Self::Pending, Self::PaymentFailed)
                | (Self::PaymentFailed, Self::Completed)
                | (Self::PaymentFailed, Self::Expired)
        )
    }

    /// Decide what moving to `target` means from here. Re-applying the
    /// current status is a no-op, which keeps fulfillment idempotent.
    pub fn decide(&self, target: OrderStatus) -> Result<Transition, FulfillmentError> {
        if *self == target {
            return Ok(Transition::Unchanged);
        }
        if self.can_transition_to(&target) {
            return Ok(Transition::Advance {
                from: *self,
                to: target,
            });
        }
        Err(FulfillmentError::InvalidState(format!(
            "order cannot move from {self} to {target}"
        )))
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OrderStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "expired" => Ok(Self::Expired),
            "payment_failed" => Ok(Self::PaymentFailed),
            other => Err(PipelineError::Validation(format!(
                "unknown order status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Advance { from: OrderStatus, to: OrderStatus },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: String,
    pub quantity: u32,
}

/// Order as seen by fulfillment. Owned by the storefront database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub order_ref: OrderRef,
    pub user_id: String,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
}

impl Order {
    pub fn pending(order_ref: OrderRef, user_id: impl Into<String>, lines: Vec<OrderLine>) -> Self {
        Self {
            order_ref,
            user_id: user_id.into(),
            status: OrderStatus::Pending,
            lines,
        }
    }
}

/// Access to purchased content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entitlement {
    pub user_id: String,
    pub product_id: String,
    pub order_ref: OrderRef,
    pub active: bool,
}
