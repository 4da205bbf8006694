pub mod adapters;
pub mod config;
pub mod domain;
pub mod infra;
pub mod ratelimit;
pub mod services;

use {
    axum::{
        Router,
        extract::DefaultBodyLimit,
        http::StatusCode,
        middleware,
        routing::{get, post},
    },
    config::AppConfig,
    domain::checkout::CheckoutGateway,
    ratelimit::SlidingWindowLimiter,
    services::dispatcher::Dispatcher,
    std::sync::Arc,
    tower::ServiceBuilder,
    tower_http::timeout::TimeoutLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub dispatcher: Arc<Dispatcher>,
    pub checkout: Option<Arc<dyn CheckoutGateway>>,
    pub limiter: Arc<SlidingWindowLimiter>,
}

pub fn build_router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/webhook", post(adapters::stripe_webhook::wh_handler));

    if state.checkout.is_some() {
        let checkout = Router::new()
            .route("/checkout", post(adapters::checkout::checkout_handler))
            .route_layer(middleware::from_fn_with_state(
                state.limiter.clone(),
                ratelimit::rate_limit,
            ));
        app = app.merge(checkout);
    }

    let timeout = state.config.request_timeout;
    app.layer(
        ServiceBuilder::new()
            .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout))
            .layer(DefaultBodyLimit::max(64 * 1024)), // Stripe events are typically under 20 KB
    )
    .with_state(state)
}
