use {
    raffle_pay::{
        AppState,
        adapters::{http, khipu::KhipuClient},
        config::AppConfig,
        infra::postgres::PgOrderStore,
        services::{
            notifier::LogNotifier,
            order_lifecycle::{CheckoutSettings, OrderLifecycle},
            reconciler::run_reconciler,
        },
    },
    sqlx::postgres::PgPoolOptions,
    std::{sync::Arc, time::Duration},
    tokio::{signal, sync::watch},
    tracing_subscriber::EnvFilter,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();
    let config = AppConfig::from_env().expect("invalid configuration");

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let gateway = KhipuClient::new(
        &config.khipu_api_base,
        &config.khipu_api_key,
        config.provider_timeout,
    )
    .expect("failed to build payment provider client");

    if config.khipu_webhook_secret.is_none() {
        tracing::warn!("KHIPU_WEBHOOK_SECRET not set, provider notifications will be rejected");
    }

    let lifecycle = Arc::new(OrderLifecycle::new(
        Arc::new(PgOrderStore::new(pool)),
        Arc::new(gateway),
        Arc::new(LogNotifier),
        CheckoutSettings::from_base_url(&config.public_base_url, config.payment_ttl),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = config.sweep_every.map(|every| {
        tokio::spawn(run_reconciler(
            Arc::clone(&lifecycle),
            every,
            config.payment_ttl,
            shutdown_rx,
        ))
    });

    let state = AppState {
        lifecycle,
        webhook_secret: config.khipu_webhook_secret.map(Into::into),
    };
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("failed to bind listener");
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    if let Some(handle) = sweeper {
        let _ = handle.await;
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
