use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::error::PipelineError;

const MAX_ORDER_REF_LEN: usize = 128;

/// Stripe event identifier (`evt_xxx`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
        let id = id.into();
        if !id.starts_with("evt_") || id.len() == 4 {
            return Err(PipelineError::Validation(format!(
                "EventId must start with evt_, got: {id}"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Storefront order reference, carried through Checkout as
/// `client_reference_id` / `metadata.order_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderRef(String);

impl OrderRef {
    pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(PipelineError::Validation("OrderRef cannot be empty".into()));
        }
        if id.len() > MAX_ORDER_REF_LEN {
            return Err(PipelineError::Validation(format!(
                "OrderRef longer than {MAX_ORDER_REF_LEN} chars"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
