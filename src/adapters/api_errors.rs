use crate::domain::error::{FulfillmentError, PipelineError, VerificationError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Newtype so the domain error can be turned into an HTTP response here,
/// not in the domain layer.
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl From<VerificationError> for ApiError {
    fn from(err: VerificationError) -> Self {
        Self(PipelineError::WebhookSignature(err))
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal error".to_string(),
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self.0 {
            PipelineError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                msg.clone(),
            ),
            PipelineError::WebhookSignature(err) => {
                tracing::warn!(reason = err.reason(), "webhook verification failed");
                (
                    StatusCode::BAD_REQUEST,
                    "webhook_error",
                    err.reason().to_string(),
                )
            }
            PipelineError::Fulfillment(FulfillmentError::InvalidState(msg)) => {
                (StatusCode::CONFLICT, "invalid_state", msg.clone())
            }
            PipelineError::Fulfillment(err @ FulfillmentError::DownstreamUnavailable(_)) => {
                tracing::error!("fulfillment error: {err}");
                internal()
            }
            PipelineError::Database(err) => {
                tracing::error!("database error: {err}");
                internal()
            }
            PipelineError::Serialization(err) => {
                tracing::error!("serialization error: {err}");
                internal()
            }
            PipelineError::Provider(msg) => {
                tracing::error!("provider error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "provider_error",
                    "payment provider error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error_code": error_code,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
