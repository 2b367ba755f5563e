use axum::{
    body::Bytes,
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::{
    error::{ApiError, ApiResult},
    models::CurrentUser,
    services::payment_service::{self, DepositInput, MIN_DEPOSIT_USD, PAY_CURRENCIES, SIGNATURE_HEADER},
    AppState,
};

// GET /api/payments/currencies
pub async fn get_currencies(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "enabled": state.payments.is_enabled(),
        "min_deposit_usd": MIN_DEPOSIT_USD,
        "currencies": PAY_CURRENCIES,
    }))
}

// POST /api/payments/deposit
pub async fn post_deposit(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    Json(input): Json<DepositInput>,
) -> ApiResult<impl IntoResponse> {
    let deposit = payment_service::create_deposit(&state, u.id, &input).await?;
    Ok((StatusCode::CREATED, Json(json!({ "deposit": deposit.to_json() }))))
}

// GET /api/payments/deposits
pub async fn get_deposits(State(state): State<AppState>, Extension(u): Extension<CurrentUser>) -> ApiResult<impl IntoResponse> {
    let items = payment_service::list_deposits(&state, Some(u.id), None, 100)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "deposits": items.iter().map(|d| d.to_json()).collect::<Vec<_>>(),
    })))
}

// GET /api/payments/status/:payment_id
pub async fn get_status(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    Path(payment_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let payment_id = payment_id.trim();
    if payment_id.is_empty() {
        return Err(ApiError::not_found("Deposit not found"));
    }

    let deposit = payment_service::refresh_status(&state, u.id, payment_id).await?;
    Ok(Json(json!({ "deposit": deposit.to_json() })))
}

// POST /api/payments/ipn
// Raw body: the signature covers the exact JSON the provider sent.
pub async fn post_ipn(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult<impl IntoResponse> {
    if !state.payments.can_verify_ipn() {
        tracing::warn!("ipn received but NOWPAYMENTS_IPN_SECRET is not set");
        return Err(ApiError::unavailable("Payments are not configured"));
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if signature.is_empty() || !state.payments.verify_ipn(&body, signature) {
        tracing::warn!("ipn rejected: bad signature");
        return Err(ApiError::unauthorized("Invalid signature"));
    }

    let deposit = payment_service::handle_ipn(&state, &body).await?;
    Ok(Json(json!({
        "ok": true,
        "status": deposit.status,
        "credited": deposit.credited,
    })))
}
