use std::sync::{Arc, Mutex};

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use studio_booking::config::AppConfig;
use studio_booking::db;
use studio_booking::handlers;
use studio_booking::services::bookings;
use studio_booking::services::clock::SystemClock;
use studio_booking::services::notifications::resend::ResendEmailSender;
use studio_booking::services::payments::stripe::StripeGateway;
use studio_booking::state::{AppState, BookingLocks};

/// How often abandoned checkouts are swept, in seconds.
const CHECKOUT_SWEEP_INTERVAL_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    if config.stripe_secret_key.is_empty() {
        tracing::warn!("STRIPE_SECRET_KEY not set, payment calls will fail");
    }
    if config.stripe_webhook_secret.is_empty() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not set, webhook signatures are not verified");
    }
    if config.admins.is_empty() {
        tracing::warn!("ADMIN_TOKENS not set, admin API is unreachable");
    }

    let conn = db::init_db(&config.database_url)?;

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        payments: Box::new(StripeGateway::new(config.stripe_secret_key.clone())),
        mailer: Box::new(ResendEmailSender::new(
            config.resend_api_key.clone(),
            config.email_from.clone(),
        )),
        clock: Box::new(SystemClock),
        locks: BookingLocks::new(),
    });

    let sweep_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(CHECKOUT_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match bookings::expire_stale_checkouts(&sweep_state).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(expired = n, "expired abandoned checkouts"),
                Err(e) => tracing::error!(error = %e, "checkout sweep failed"),
            }
        }
    });

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
