use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::config::AppState;
use crate::domain::wallet::{PayoutSettingsRequest, VerifyPayoutMethodRequest, WalletView};
use crate::error::AppError;
use crate::middleware::{AuthSeller, AuthSuperadmin};

// Balance and payout settings of the calling seller
#[utoipa::path(
    get,
    path = "/api/wallet",
    responses(
        (status = 200, description = "Wallet of the seller", body = WalletView),
        (status = 401, description = "Unauthorized - JWT token invalid or missing"),
        (status = 403, description = "Forbidden - User is not a seller"),
        (status = 404, description = "Seller has no wallet yet")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Wallet"
)]
pub async fn get_wallet(
    State(state): State<AppState>,
    auth: AuthSeller,
) -> Result<Json<Value>, AppError> {
    tracing::debug!("Fetching wallet for seller {}", auth.user_id);

    let view = state.wallets.view(auth.user_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": view
    })))
}

// Payout method details; changing them drops the verification flag
#[utoipa::path(
    put,
    path = "/api/wallet/payout-settings",
    request_body = PayoutSettingsRequest,
    responses(
        (status = 200, description = "Settings saved", body = crate::domain::wallet::Wallet),
        (status = 400, description = "Invalid payout details"),
        (status = 401, description = "Unauthorized - JWT token invalid or missing"),
        (status = 403, description = "Forbidden - User is not a seller")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Wallet"
)]
pub async fn update_payout_settings(
    State(state): State<AppState>,
    auth: AuthSeller,
    Json(request): Json<PayoutSettingsRequest>,
) -> Result<Json<Value>, AppError> {
    let wallet = state
        .wallets
        .update_settings(auth.user_id, auth.role, request)
        .await?;

    let message = if wallet.payout_method_verified() {
        "Payout settings saved"
    } else {
        "Payout settings saved, waiting for verification"
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "data": wallet
    })))
}

#[utoipa::path(
    post,
    path = "/api/admin/wallets/{user_id}/verify",
    params(
        ("user_id" = i32, Path, description = "Seller user ID")
    ),
    request_body = VerifyPayoutMethodRequest,
    responses(
        (status = 200, description = "Verification flag updated", body = crate::domain::wallet::Wallet),
        (status = 403, description = "Forbidden - Superadmin only"),
        (status = 404, description = "No details on file for that method")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Admin"
)]
pub async fn verify_wallet_method(
    State(state): State<AppState>,
    auth: AuthSuperadmin,
    Path(user_id): Path<i32>,
    Json(request): Json<VerifyPayoutMethodRequest>,
) -> Result<Json<Value>, AppError> {
    tracing::info!("Superadmin {} verifying {} for user {}", auth.user_id, request.method, user_id);

    let wallet = state.wallets.verify_method(user_id, request).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Payout method verification updated",
        "data": wallet
    })))
}
