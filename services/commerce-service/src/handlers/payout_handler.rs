use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use validator::Validate;

use crate::config::AppState;
use crate::domain::payout::{
    CompletePayoutRequest, Payout, PayoutFilter, PayoutResult, PayoutRunSummary, RejectPayoutRequest,
};
use crate::error::AppError;
use crate::middleware::{AuthSeller, AuthSuperadmin};
use crate::payouts::PayoutDetail;

fn result_response(result: PayoutResult) -> Json<Value> {
    Json(json!({
        "success": result.success,
        "message": result.message,
        "data": result
    }))
}

// Seller-initiated payout of the available balance
#[utoipa::path(
    post,
    path = "/api/payouts/request",
    responses(
        (status = 200, description = "Payout started or refused with a reason", body = PayoutResult),
        (status = 401, description = "Unauthorized - JWT token invalid or missing"),
        (status = 403, description = "Forbidden - User is not a seller")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Payouts"
)]
pub async fn request_payout(
    State(state): State<AppState>,
    auth: AuthSeller,
) -> Result<Json<Value>, AppError> {
    tracing::info!("Seller {} requested a payout", auth.user_id);

    let result = state.payouts.request_payout(auth.user_id).await?;
    Ok(result_response(result))
}

// Payout history of the calling seller
#[utoipa::path(
    get,
    path = "/api/payouts",
    params(PayoutFilter),
    responses(
        (status = 200, description = "Payouts of the seller", body = Vec<Payout>),
        (status = 401, description = "Unauthorized - JWT token invalid or missing"),
        (status = 403, description = "Forbidden - User is not a seller")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Payouts"
)]
pub async fn list_my_payouts(
    State(state): State<AppState>,
    auth: AuthSeller,
    Query(mut filter): Query<PayoutFilter>,
) -> Result<Json<Value>, AppError> {
    filter.user_id = Some(auth.user_id);

    let payouts = state.payouts.list(&filter).await?;

    Ok(Json(json!({
        "success": true,
        "data": payouts,
        "pagination": {
            "page": filter.page(),
            "limit": filter.limit()
        }
    })))
}

#[utoipa::path(
    post,
    path = "/api/admin/payouts/run",
    responses(
        (status = 200, description = "Batch finished", body = PayoutRunSummary),
        (status = 403, description = "Forbidden - Superadmin only")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Admin"
)]
pub async fn run_payouts(
    State(state): State<AppState>,
    auth: AuthSuperadmin,
) -> Result<Json<Value>, AppError> {
    tracing::info!("Superadmin {} triggered an auto payout run", auth.user_id);

    let summary = state.payouts.process_all_auto_payouts().await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("{} of {} payouts started", summary.succeeded, summary.attempted),
        "data": summary
    })))
}

#[utoipa::path(
    post,
    path = "/api/admin/payouts/auto/{user_id}",
    params(
        ("user_id" = i32, Path, description = "Seller user ID")
    ),
    responses(
        (status = 200, description = "Payout started or refused with a reason", body = PayoutResult),
        (status = 403, description = "Forbidden - Superadmin only")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Admin"
)]
pub async fn process_user_payout(
    State(state): State<AppState>,
    auth: AuthSuperadmin,
    Path(user_id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    tracing::info!("Superadmin {} triggered a payout for user {}", auth.user_id, user_id);

    let result = state.payouts.process_auto_payout(user_id).await?;
    Ok(result_response(result))
}

#[utoipa::path(
    get,
    path = "/api/admin/payouts",
    params(PayoutFilter),
    responses(
        (status = 200, description = "Payouts matching the filter", body = Vec<Payout>),
        (status = 403, description = "Forbidden - Superadmin only")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Admin"
)]
pub async fn list_payouts(
    State(state): State<AppState>,
    _auth: AuthSuperadmin,
    Query(filter): Query<PayoutFilter>,
) -> Result<Json<Value>, AppError> {
    let payouts = state.payouts.list(&filter).await?;

    Ok(Json(json!({
        "success": true,
        "data": payouts,
        "pagination": {
            "page": filter.page(),
            "limit": filter.limit()
        }
    })))
}

#[utoipa::path(
    get,
    path = "/api/admin/payouts/{payout_id}",
    params(
        ("payout_id" = i32, Path, description = "Payout ID")
    ),
    responses(
        (status = 200, description = "Payout with the commissions it covers", body = PayoutDetail),
        (status = 403, description = "Forbidden - Superadmin only"),
        (status = 404, description = "Payout not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Admin"
)]
pub async fn get_payout(
    State(state): State<AppState>,
    _auth: AuthSuperadmin,
    Path(payout_id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    let detail = state.payouts.detail(payout_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": detail
    })))
}

#[utoipa::path(
    post,
    path = "/api/admin/payouts/{payout_id}/approve",
    params(
        ("payout_id" = i32, Path, description = "Payout ID")
    ),
    responses(
        (status = 200, description = "Payout approved and dispatched", body = PayoutResult),
        (status = 403, description = "Forbidden - Superadmin only"),
        (status = 404, description = "Payout not found"),
        (status = 409, description = "Payout is not awaiting approval")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Admin"
)]
pub async fn approve_payout(
    State(state): State<AppState>,
    auth: AuthSuperadmin,
    Path(payout_id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    let result = state.payouts.approve(payout_id, auth.user_id).await?;
    Ok(result_response(result))
}

#[utoipa::path(
    post,
    path = "/api/admin/payouts/{payout_id}/reject",
    params(
        ("payout_id" = i32, Path, description = "Payout ID")
    ),
    request_body = RejectPayoutRequest,
    responses(
        (status = 200, description = "Payout rejected, commissions released", body = Payout),
        (status = 400, description = "Reason missing or too long"),
        (status = 403, description = "Forbidden - Superadmin only"),
        (status = 409, description = "Payout can no longer be rejected")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Admin"
)]
pub async fn reject_payout(
    State(state): State<AppState>,
    auth: AuthSuperadmin,
    Path(payout_id): Path<i32>,
    Json(request): Json<RejectPayoutRequest>,
) -> Result<Json<Value>, AppError> {
    request.validate()?;

    let payout = state
        .payouts
        .reject(payout_id, &request.reason, auth.user_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Payout rejected",
        "data": payout
    })))
}

// Record the proof of a manual transfer
#[utoipa::path(
    post,
    path = "/api/admin/payouts/{payout_id}/complete",
    params(
        ("payout_id" = i32, Path, description = "Payout ID")
    ),
    request_body = CompletePayoutRequest,
    responses(
        (status = 200, description = "Payout marked as completed", body = Payout),
        (status = 400, description = "Proof missing or payout is not manual"),
        (status = 403, description = "Forbidden - Superadmin only"),
        (status = 409, description = "Payout is not processing")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Admin"
)]
pub async fn complete_payout(
    State(state): State<AppState>,
    auth: AuthSuperadmin,
    Path(payout_id): Path<i32>,
    Json(request): Json<CompletePayoutRequest>,
) -> Result<Json<Value>, AppError> {
    request.validate()?;

    let payout = state.payouts.complete(payout_id, request, auth.user_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Payout completed",
        "data": payout
    })))
}

#[utoipa::path(
    post,
    path = "/api/admin/payouts/{payout_id}/retry",
    params(
        ("payout_id" = i32, Path, description = "Payout ID")
    ),
    responses(
        (status = 200, description = "Transfer attempted again", body = PayoutResult),
        (status = 403, description = "Forbidden - Superadmin only"),
        (status = 409, description = "Payout is not failed or stuck")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Admin"
)]
pub async fn retry_payout(
    State(state): State<AppState>,
    auth: AuthSuperadmin,
    Path(payout_id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    tracing::info!("Superadmin {} retrying payout {}", auth.user_id, payout_id);

    let result = state.payouts.retry(payout_id, auth.user_id).await?;
    Ok(result_response(result))
}
