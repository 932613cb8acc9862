mod catalog;
mod config;
mod domain;
mod error;
mod gateways;
mod handlers;
mod ledger;
mod middleware;
mod payouts;
mod repositories;
mod routes;
mod scheduler;

use config::AppState;
use routes::create_routes;
use scheduler::PayoutScheduler;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Entry point of the commerce service
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    setup_logging();

    // Create application state (database, gateways, ledgers)
    let app_state = AppState::from_env().await?;

    info!(
        "🚀 Commerce Service starting on {}:{}",
        app_state.config.server_host, app_state.config.server_port
    );
    info!(
        "💳 Gateways: JazzCash ({}) | Safepay ({}) | Commission: {}%",
        app_state.config.jazzcash.checkout_url,
        app_state.config.safepay.environment,
        app_state.config.platform_commission_percent
    );

    // Keep the job scheduler alive until shutdown
    let _jobs = PayoutScheduler::new(
        app_state.payouts.clone(),
        app_state.checkout.clone(),
        app_state.config.payout.clone(),
    )
    .start()
    .await?;

    start_server(app_state).await
}

/// Structured logging; `security` and `ledger_anomaly` targets stay visible
fn setup_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "commerce_service=debug,security=info,ledger_anomaly=warn,tower_http=debug",
                )
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Start the server with graceful shutdown
async fn start_server(app_state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let host = app_state.config.server_host.clone();
    let port = app_state.config.server_port;

    let app = create_routes(app_state);

    let listener = TcpListener::bind(format!("{}:{}", host, port)).await?;

    info!("🌐 Server running on http://{}:{}", host, port);
    info!("📚 API Docs: http://{}:{}/docs", host, port);
    info!("🏥 Health Check: http://{}:{}/health", host, port);

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("🛑 Received shutdown signal");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("✅ Commerce Service shutdown successfully");
    Ok(())
}
