use {
    crate::{
        config::CheckoutConfig,
        domain::{
            checkout::{CheckoutGateway, CheckoutRequest, CheckoutSession},
            error::PipelineError,
            ledger::BoxFuture,
            money::Currency,
        },
    },
    std::collections::HashMap,
};

pub struct StripeCheckout {
    client: stripe::Client,
    currency: Currency,
    success_url: String,
    cancel_url: String,
}

impl StripeCheckout {
    pub fn new(config: &CheckoutConfig) -> Self {
        Self {
            client: stripe::Client::new(config.secret_key.clone()),
            currency: config.currency,
            success_url: config.success_url.clone(),
            cancel_url: config.cancel_url.clone(),
        }
    }

    async fn create_session_inner(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PipelineError> {
        let mut params = stripe::CreateCheckoutSession::new();
        params.mode = Some(stripe::CheckoutSessionMode::Payment);
        params.success_url = Some(&self.success_url);
        params.cancel_url = Some(&self.cancel_url);

        if let Some(order) = request.order_id() {
            params.client_reference_id = Some(order.as_str());
            let mut meta = HashMap::new();
            meta.insert("order_id".to_string(), order.to_string());
            params.metadata = Some(meta);
        }

        let line_items: Vec<stripe::CreateCheckoutSessionLineItems> = request
            .items()
            .iter()
            .map(|item| stripe::CreateCheckoutSessionLineItems {
                price_data: Some(stripe::CreateCheckoutSessionLineItemsPriceData {
                    currency: convert_currency(self.currency),
                    product_data: Some(stripe::CreateCheckoutSessionLineItemsPriceDataProductData {
                        name: item.name().to_string(),
                        ..Default::default()
                    }),
                    unit_amount: Some(item.amount().cents()),
                    ..Default::default()
                }),
                quantity: Some(u64::from(item.quantity())),
                ..Default::default()
            })
            .collect();
        params.line_items = Some(line_items);

        let session = stripe::CheckoutSession::create(&self.client, params)
            .await
            .map_err(|e| PipelineError::Provider(format!("Stripe API: {e}")))?;

        let url = session
            .url
            .ok_or_else(|| PipelineError::Provider("checkout session URL missing".into()))?;

        Ok(CheckoutSession {
            id: session.id.to_string(),
            url,
        })
    }
}

impl CheckoutGateway for StripeCheckout {
    fn create_session<'a>(
        &'a self,
        request: &'a CheckoutRequest,
    ) -> BoxFuture<'a, Result<CheckoutSession, PipelineError>> {
        Box::pin(self.create_session_inner(request))
    }
}

pub fn convert_currency(c: Currency) -> stripe::Currency {
    match c {
        Currency::Usd => stripe::Currency::USD,
        Currency::Eur => stripe::Currency::EUR,
        Currency::Gbp => stripe::Currency::GBP,
    }
}
