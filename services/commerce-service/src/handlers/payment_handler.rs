use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use reqwest::Url;
use serde_json::{json, Value};
use shared::utils::token_extraction::{extract_client_ip, extract_user_agent};
use std::collections::BTreeMap;

use crate::config::AppState;
use crate::domain::payment::{GatewayKind, PurchaseRequest, PurchaseResponse};
use crate::error::AppError;
use crate::ledger::Settlement;
use crate::middleware::AuthUser;

/// Start a purchase
#[utoipa::path(
    post,
    path = "/api/purchase",
    tag = "Purchases",
    summary = "Purchase an item",
    description = "Returns the existing access grant when the caller already owns the item in this format, otherwise opens a hosted checkout with the chosen gateway",
    request_body = PurchaseRequest,
    responses(
        (status = 200, description = "Existing grant or checkout instructions", body = PurchaseResponse),
        (status = 400, description = "Invalid request or format not sold"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Item not found"),
        (status = 502, description = "Gateway unavailable")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_purchase(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(request): Json<PurchaseRequest>,
) -> Result<Json<Value>, AppError> {
    tracing::info!(
        "User {} purchasing {}:{} ({}) via {}",
        auth.user_id,
        request.item_type,
        request.item_id,
        request.format,
        request.gateway
    );

    let response = state.checkout.initiate_purchase(auth.user_id, request).await?;
    let message = match &response {
        PurchaseResponse::AlreadyOwned { .. } => "You already own this item",
        PurchaseResponse::Checkout { .. } => "Checkout created",
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "data": response
    })))
}

fn frontend_result_url(frontend_url: &str, params: &[(&str, String)]) -> String {
    let base = format!("{}/payment/result", frontend_url.trim_end_matches('/'));
    Url::parse_with_params(&base, params)
        .map(|url| url.to_string())
        .unwrap_or(base)
}

fn return_redirect(state: &AppState, gateway: GatewayKind, result: Result<Settlement, AppError>) -> Redirect {
    let params = match result {
        Ok(settlement) => {
            tracing::info!(
                "{} return settled payment {} as {}",
                gateway,
                settlement.payment.transaction_ref,
                settlement.payment.status
            );
            vec![
                ("payment_id", settlement.payment.id.to_string()),
                ("ref", settlement.payment.transaction_ref),
                ("status", settlement.payment.status.to_string()),
            ]
        }
        Err(e) => {
            tracing::warn!("{} return could not be settled: {}", gateway, e);
            vec![("status", "error".to_string())]
        }
    };

    Redirect::to(&frontend_result_url(&state.config.frontend_url, &params))
}

/// Browser return from the gateway (query string)
#[utoipa::path(
    get,
    path = "/api/payments/{gateway}/return",
    tag = "Gateway Callbacks",
    params(
        ("gateway" = GatewayKind, Path, description = "jazzcash or safepay")
    ),
    responses(
        (status = 303, description = "Redirect to the frontend result page")
    )
)]
pub async fn gateway_return_get(
    State(state): State<AppState>,
    Path(gateway): Path<GatewayKind>,
    Query(fields): Query<BTreeMap<String, String>>,
) -> Redirect {
    let result = state.checkout.handle_return(gateway, &fields).await;
    return_redirect(&state, gateway, result)
}

/// Browser return from the gateway (form post)
#[utoipa::path(
    post,
    path = "/api/payments/{gateway}/return",
    tag = "Gateway Callbacks",
    params(
        ("gateway" = GatewayKind, Path, description = "jazzcash or safepay")
    ),
    responses(
        (status = 303, description = "Redirect to the frontend result page")
    )
)]
pub async fn gateway_return_post(
    State(state): State<AppState>,
    Path(gateway): Path<GatewayKind>,
    Form(fields): Form<BTreeMap<String, String>>,
) -> Redirect {
    let result = state.checkout.handle_return(gateway, &fields).await;
    return_redirect(&state, gateway, result)
}

/// Server-to-server notification
#[utoipa::path(
    post,
    path = "/api/payments/{gateway}/webhook",
    tag = "Gateway Callbacks",
    description = "Signature checked before anything is applied. Always acknowledged with 200 unless a transient failure should make the gateway redeliver.",
    params(
        ("gateway" = GatewayKind, Path, description = "jazzcash or safepay")
    ),
    request_body(content = Vec<u8>, description = "Raw gateway notification body", content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Acknowledged"),
        (status = 503, description = "Temporary failure, redeliver later")
    )
)]
pub async fn gateway_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<GatewayKind>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let signature = state
        .checkout
        .signature_header(gateway)?
        .and_then(|name| headers.get(name))
        .and_then(|value| value.to_str().ok());

    tracing::debug!(
        target: "security",
        "{} webhook from ip={} agent={} ({} bytes)",
        gateway,
        extract_client_ip(&headers).unwrap_or_else(|| "unknown".to_string()),
        extract_user_agent(&headers).unwrap_or_default(),
        body.len()
    );

    let ack = state.checkout.handle_webhook(gateway, signature, &body).await?;
    Ok((StatusCode::OK, Json(ack.body)).into_response())
}

/// Poll the status of a payment
#[utoipa::path(
    get,
    path = "/api/payments/verify/{payment_id}",
    tag = "Purchases",
    description = "Checks a pending payment with the gateway before answering",
    params(
        ("payment_id" = i32, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Payment status", body = crate::domain::payment::PaymentStatusView),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Payment belongs to another user"),
        (status = 404, description = "Payment not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn verify_payment(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(payment_id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    let view = state.checkout.verify_status(payment_id, auth.user_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": view
    })))
}

/// Access grants of the caller
#[utoipa::path(
    get,
    path = "/api/purchases",
    tag = "Purchases",
    responses(
        (status = 200, description = "Purchases of the caller", body = Vec<crate::domain::purchase::Purchase>),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_purchases(auth: AuthUser, State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let purchases = state.purchases.list_for_user(auth.user_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": purchases
    })))
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    responses(
        (status = 200, description = "Service health", body = crate::config::HealthStatus)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let health = state.health_check().await;

    Json(json!({
        "status": health.overall,
        "service": "commerce-service",
        "version": state.config.app_version,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "checks": health
    }))
}

/// Service information
#[utoipa::path(
    get,
    path = "/info",
    tag = "System",
    responses(
        (status = 200, description = "Service information")
    )
)]
pub async fn get_service_info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": "commerce-service",
        "version": state.config.app_version,
        "environment": state.config.environment,
        "currency": state.config.currency,
        "gateways": [GatewayKind::JazzCash, GatewayKind::Safepay],
        "platform_commission_percent": state.config.platform_commission_percent.to_string(),
        "minimum_payout": state.config.payout.minimum_payout.to_string(),
        "payout_cadence": state.config.payout.cadence.to_string(),
    }))
}
