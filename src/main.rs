use {
    shelf_pay::{
        AppState,
        adapters::stripe_client::StripeCheckout,
        build_router,
        config::{AppConfig, FulfillmentMode},
        domain::{
            checkout::CheckoutGateway, fulfillment::FulfillmentStore, ledger::IdempotencyLedger,
        },
        infra::{
            memory::{MemoryLedger, MemoryOrderStore},
            postgres::{PgJobQueue, PgLedger, PgOrderStore},
        },
        ratelimit::{self, SlidingWindowLimiter},
        services::{dispatcher::Dispatcher, fulfillment::FulfillmentExecutor, worker},
    },
    sqlx::postgres::PgPoolOptions,
    std::{net::SocketAddr, sync::Arc, time::Duration},
    tokio::{signal, sync::watch},
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Arc::new(AppConfig::from_env().expect("invalid configuration"));

    let pool = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(20)
                .acquire_timeout(Duration::from_secs(3))
                .connect(url)
                .await
                .expect("failed to connect to database");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("failed to run migrations");
            Some(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory ledger and order store");
            None
        }
    };

    let (ledger, store): (Arc<dyn IdempotencyLedger>, Arc<dyn FulfillmentStore>) = match &pool {
        Some(pool) => (
            Arc::new(PgLedger::new(pool.clone(), config.reservation_lease)),
            Arc::new(PgOrderStore::new(pool.clone())),
        ),
        None => (
            Arc::new(MemoryLedger::new(config.reservation_lease)),
            Arc::new(MemoryOrderStore::new()),
        ),
    };

    let executor = FulfillmentExecutor::new(store);
    let mut dispatcher = Dispatcher::new(ledger.clone(), executor.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    if config.fulfillment_mode == FulfillmentMode::Deferred {
        // Config validation guarantees a pool in deferred mode.
        if let Some(pool) = &pool {
            dispatcher = dispatcher.with_queue(Arc::new(PgJobQueue::new(pool.clone())));
            tasks.push(tokio::spawn(worker::run_worker(
                pool.clone(),
                executor.clone(),
                ledger.clone(),
                shutdown_rx.clone(),
            )));
        }
    }

    tasks.push(tokio::spawn(worker::run_reaper(
        pool.clone(),
        ledger.clone(),
        config.ledger_retention,
        shutdown_rx.clone(),
    )));

    let limiter = Arc::new(SlidingWindowLimiter::new(config.rate_limit.clone()));
    tasks.push(tokio::spawn(ratelimit::run_eviction(
        limiter.clone(),
        shutdown_rx.clone(),
    )));

    let checkout = config
        .checkout
        .as_ref()
        .map(|c| Arc::new(StripeCheckout::new(c)) as Arc<dyn CheckoutGateway>);
    if checkout.is_none() {
        tracing::info!("STRIPE_SECRET_KEY not set, checkout route disabled");
    }

    let state = AppState {
        config: config.clone(),
        dispatcher: Arc::new(dispatcher),
        checkout,
        limiter,
    };

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("failed to bind");
    tracing::info!(addr = %config.bind_addr, mode = ?config.fulfillment_mode, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
