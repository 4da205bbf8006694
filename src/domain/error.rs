use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("webhook signature: {0}")]
    WebhookSignature(#[from] VerificationError),

    #[error("fulfillment: {0}")]
    Fulfillment(#[from] FulfillmentError),

    #[error("provider: {0}")]
    Provider(String),
}

/// Why an inbound delivery was not trusted. Any of these means the
/// payload must not be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("missing signature header")]
    MissingHeader,

    #[error("malformed signature header or payload")]
    BadFormat,

    #[error("no signature matches the payload")]
    SignatureMismatch,

    #[error("timestamp outside the tolerance window")]
    TimestampExpired,
}

impl VerificationError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_header",
            Self::BadFormat => "bad_format",
            Self::SignatureMismatch => "signature_mismatch",
            Self::TimestampExpired => "timestamp_expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FulfillmentError {
    /// Storage or another collaborator is down. The provider should redeliver.
    #[error("downstream unavailable: {0}")]
    DownstreamUnavailable(String),

    /// The order cannot take this effect (unknown, or already terminal).
    /// Retrying will not help.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl FulfillmentError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DownstreamUnavailable(_))
    }
}

impl From<sqlx::Error> for FulfillmentError {
    fn from(err: sqlx::Error) -> Self {
        Self::DownstreamUnavailable(err.to_string())
    }
}
