use {
    crate::{
        AppState,
        adapters::{api_errors::ApiError, stripe_signature},
        domain::error::VerificationError,
        services::dispatcher::DispatchOutcome,
    },
    axum::{Json, body::Bytes, extract::State, http::HeaderMap},
};

#[tracing::instrument(
    name = "webhook",
    skip_all,
    fields(event_id = tracing::field::Empty, event_type = tracing::field::Empty)
)]
pub async fn wh_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sig = match headers.get(stripe_signature::SIGNATURE_HEADER) {
        None => return Err(VerificationError::MissingHeader.into()),
        Some(v) => v.to_str().map_err(|_| VerificationError::BadFormat)?,
    };

    // Verify the bytes exactly as received; never a re-serialized copy.
    let event = stripe_signature::verify(
        &body,
        sig,
        &state.config.stripe_webhook_secret,
        state.config.webhook_tolerance_secs,
    )?;

    tracing::Span::current()
        .record("event_id", tracing::field::display(event.id()))
        .record("event_type", tracing::field::display(event.event_type()));

    let outcome = state.dispatcher.dispatch(&event).await?;
    match outcome {
        DispatchOutcome::Fulfilled(applied) => {
            tracing::info!(?applied, "event processed");
        }
        DispatchOutcome::Deferred => {
            tracing::info!("event enqueued for async fulfillment");
        }
        DispatchOutcome::Ignored
        | DispatchOutcome::Duplicate
        | DispatchOutcome::SkippedInvalidState => {}
    }

    Ok(Json(serde_json::json!({"status": outcome.status()})))
}
