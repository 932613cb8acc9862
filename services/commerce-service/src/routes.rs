// API routes for the commerce service

use crate::config::AppState;
use crate::handlers::{payment_handler, payout_handler, wallet_handler};
use crate::middleware::{auth_middleware, rate_limit_middleware};
use axum::{
    extract::Request,
    http::{header::HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
    routing::{get, post, put},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::Modify;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// OpenAPI documentation for the commerce service
#[derive(OpenApi)]
#[openapi(
    paths(
        payment_handler::create_purchase,
        payment_handler::gateway_return_get,
        payment_handler::gateway_return_post,
        payment_handler::gateway_webhook,
        payment_handler::verify_payment,
        payment_handler::list_purchases,
        payment_handler::health_check,
        payment_handler::get_service_info,
        wallet_handler::get_wallet,
        wallet_handler::update_payout_settings,
        wallet_handler::verify_wallet_method,
        payout_handler::request_payout,
        payout_handler::list_my_payouts,
        payout_handler::run_payouts,
        payout_handler::process_user_payout,
        payout_handler::list_payouts,
        payout_handler::get_payout,
        payout_handler::approve_payout,
        payout_handler::reject_payout,
        payout_handler::complete_payout,
        payout_handler::retry_payout,
    ),
    components(
        schemas(
            crate::domain::payment::PurchaseRequest,
            crate::domain::payment::PurchaseResponse,
            crate::domain::payment::CheckoutInstructions,
            crate::domain::payment::PaymentStatusView,
            crate::domain::payment::Payment,
            crate::domain::payment::PaymentStatus,
            crate::domain::payment::EarningsStatus,
            crate::domain::payment::GatewayKind,
            crate::domain::payment::ItemType,
            crate::domain::payment::ContentFormat,
            crate::domain::payment::SellerType,
            crate::domain::purchase::Purchase,
            crate::domain::commission::Commission,
            crate::domain::wallet::Wallet,
            crate::domain::wallet::WalletView,
            crate::domain::wallet::PayoutSettingsRequest,
            crate::domain::wallet::VerifyPayoutMethodRequest,
            crate::domain::payout::Payout,
            crate::domain::payout::PayoutMethod,
            crate::domain::payout::PayoutStatus,
            crate::domain::payout::PayoutTrigger,
            crate::domain::payout::RecipientDetails,
            crate::domain::payout::PayoutFailure,
            crate::domain::payout::PayoutResult,
            crate::domain::payout::PayoutRunSummary,
            crate::domain::payout::RejectPayoutRequest,
            crate::domain::payout::CompletePayoutRequest,
            crate::payouts::PayoutDetail,
            crate::config::HealthStatus
        )
    ),
    tags(
        (name = "Purchases", description = "Buying books and judgments"),
        (name = "Gateway Callbacks", description = "JazzCash and Safepay returns and notifications"),
        (name = "Wallet", description = "Seller balance and payout settings"),
        (name = "Payouts", description = "Seller payouts"),
        (name = "Admin", description = "Payout administration"),
        (name = "System", description = "Health and service information")
    ),
    info(
        title = "Commerce Service API",
        description = "Marketplace payments, commissions and seller payouts\n\n## Features\n\n- 💳 JazzCash and Safepay hosted checkout\n- 🔒 Signed gateway callbacks, applied exactly once\n- 📒 Platform commission split per sale\n- 💸 Scheduled and on-demand seller payouts\n- 🌐 Redis-based rate limiting",
        version = "1.0.0"
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub struct ApiDoc;

// Security scheme modifier for Bearer JWT authentication
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            )
        }
    }
}

// Security headers middleware
async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static(
            "default-src 'self'; script-src 'self' 'unsafe-inline'; style-src 'self' 'unsafe-inline'; img-src 'self' data: https:; font-src 'self'; connect-src 'self'; frame-ancestors 'none';",
        ),
    );
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("X-XSS-Protection", HeaderValue::from_static("1; mode=block"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("strict-origin-when-cross-origin"));
    headers.insert(
        "Permissions-Policy",
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );

    response
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::ACCEPT,
            axum::http::header::CONTENT_TYPE,
        ])
        .allow_credentials(false)
        .max_age(Duration::from_secs(86400));

    match frontend_url.trim_end_matches('/').parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::error!("FRONTEND_URL is not a valid origin, cross-origin requests will be refused");
            cors
        }
    }
}

// Build the router: public callbacks, JWT-protected API, shared middleware
pub fn create_routes(state: AppState) -> Router {
    if state.config.is_production() {
        tracing::warn!("Commerce Service running in PRODUCTION mode");
    } else {
        tracing::info!("Commerce Service running in DEVELOPMENT mode");
    }

    let cors = cors_layer(&state.config.frontend_url);

    let mut openapi = ApiDoc::openapi();
    SecurityAddon.modify(&mut openapi);

    // Public routes, no JWT
    let public_routes = Router::new()
        .route("/health", get(payment_handler::health_check))
        .route("/info", get(payment_handler::get_service_info))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi))
        .with_state(state.clone());

    // Gateways call these directly; authenticity comes from their signatures
    let callback_routes = build_callback_routes(state.clone()).layer(axum::middleware::from_fn_with_state(
        state.rate_limiter.clone(),
        rate_limit_middleware,
    ));

    // Rate limiting runs after auth so the caller's role picks the budget
    let protected_routes = build_api_routes(state.clone())
        .layer(axum::middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware));

    public_routes
        .merge(callback_routes)
        .merge(protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(30)))
                .layer(cors),
        )
        .layer(axum::middleware::from_fn(security_headers_middleware))
}

fn build_callback_routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/payments/{gateway}/return",
            get(payment_handler::gateway_return_get).post(payment_handler::gateway_return_post),
        )
        .route("/api/payments/{gateway}/webhook", post(payment_handler::gateway_webhook))
        .with_state(state)
}

fn build_api_routes(state: AppState) -> Router {
    Router::new()
        // ===== Purchases =====
        .route("/api/purchase", post(payment_handler::create_purchase))
        .route("/api/purchases", get(payment_handler::list_purchases))
        .route("/api/payments/verify/{payment_id}", get(payment_handler::verify_payment))

        // ===== Seller wallet =====
        .route("/api/wallet", get(wallet_handler::get_wallet))
        .route("/api/wallet/payout-settings", put(wallet_handler::update_payout_settings))

        // ===== Seller payouts =====
        .route("/api/payouts", get(payout_handler::list_my_payouts))
        .route("/api/payouts/request", post(payout_handler::request_payout))

        // ===== Admin =====
        .route("/api/admin/wallets/{user_id}/verify", post(wallet_handler::verify_wallet_method))
        .route("/api/admin/payouts", get(payout_handler::list_payouts))
        .route("/api/admin/payouts/run", post(payout_handler::run_payouts))
        .route("/api/admin/payouts/auto/{user_id}", post(payout_handler::process_user_payout))
        .route("/api/admin/payouts/{payout_id}", get(payout_handler::get_payout))
        .route("/api/admin/payouts/{payout_id}/approve", post(payout_handler::approve_payout))
        .route("/api/admin/payouts/{payout_id}/reject", post(payout_handler::reject_payout))
        .route("/api/admin/payouts/{payout_id}/complete", post(payout_handler::complete_payout))
        .route("/api/admin/payouts/{payout_id}/retry", post(payout_handler::retry_payout))
        .with_state(state)
}
