use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Extension, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use mongodb::bson::doc;
use serde_json::json;

use crate::{
    error::{ApiError, ApiResult},
    models::CurrentUser,
    services::{
        audit_service,
        withdrawal_service::{self, WithdrawalInput},
    },
    AppState,
};

use super::{load_user, parse_id, request_ip};

// POST /api/withdrawals
pub async fn post_withdrawal(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(input): Json<WithdrawalInput>,
) -> ApiResult<impl IntoResponse> {
    let user = load_user(&state, u.id).await?;
    let w = withdrawal_service::request_withdrawal(&state, &user, &input).await?;

    audit_service::record(
        &state,
        Some(u.id),
        "withdrawal.requested",
        Some(w.id.to_hex()),
        doc! { "currency": &w.currency, "amount": w.amount, "address": &w.address },
        request_ip(&headers, peer),
    )
    .await;

    Ok((StatusCode::CREATED, Json(json!({ "withdrawal": w.to_json() }))))
}

// GET /api/withdrawals
pub async fn get_withdrawals(State(state): State<AppState>, Extension(u): Extension<CurrentUser>) -> ApiResult<impl IntoResponse> {
    let items = withdrawal_service::list(&state, Some(u.id), None, 100)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "withdrawals": items.iter().map(|w| w.to_json()).collect::<Vec<_>>(),
    })))
}

// DELETE /api/withdrawals/:id
pub async fn delete_withdrawal(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "Withdrawal")?;
    let w = withdrawal_service::cancel(&state, u.id, id).await?;
    Ok(Json(json!({ "withdrawal": w.to_json() })))
}
