use {
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::{
            checkout::{CheckoutRequest, LineItem},
            error::PipelineError,
            id::OrderRef,
        },
    },
    axum::{Json, extract::State},
    serde::Deserialize,
};

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub order_id: Option<String>,
    pub items: Vec<LineItemBody>,
}

#[derive(Debug, Deserialize)]
pub struct LineItemBody {
    pub name: String,
    /// Minor units.
    pub amount: i64,
    pub quantity: u32,
}

impl TryFrom<CheckoutBody> for CheckoutRequest {
    type Error = PipelineError;

    fn try_from(body: CheckoutBody) -> Result<Self, Self::Error> {
        let order_id = body.order_id.map(OrderRef::new).transpose()?;
        let items = body
            .items
            .into_iter()
            .map(|i| LineItem::new(i.name, i.amount, i.quantity))
            .collect::<Result<Vec<_>, _>>()?;
        CheckoutRequest::new(order_id, items)
    }
}

#[tracing::instrument(name = "checkout", skip_all)]
pub async fn checkout_handler(
    State(state): State<AppState>,
    Json(body): Json<CheckoutBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let gateway = state
        .checkout
        .as_ref()
        .ok_or_else(|| PipelineError::Provider("checkout is not configured".into()))?;

    let request = CheckoutRequest::try_from(body)?;
    let session = gateway.create_session(&request).await?;

    tracing::info!(
        session_id = %session.id,
        order_id = request.order_id().map(|o| o.as_str()).unwrap_or(""),
        total = request.total().cents(),
        items = request.items().len(),
        "checkout session created"
    );
    Ok(Json(serde_json::json!({"id": session.id, "url": session.url})))
}
