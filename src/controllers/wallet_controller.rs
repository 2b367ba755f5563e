use axum::{
    extract::{Extension, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{ApiError, ApiResult},
    models::CurrentUser,
    services::account_service,
    AppState,
};

use super::blank_to_none;

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<i64>,
    pub skip: Option<u64>,
    pub kind: Option<String>,
}

// GET /api/wallets
pub async fn get_wallets(State(state): State<AppState>, Extension(u): Extension<CurrentUser>) -> ApiResult<impl IntoResponse> {
    let wallets = account_service::list_wallets(&state, u.id)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "wallets": wallets.iter().map(|w| w.to_json()).collect::<Vec<_>>(),
    })))
}

// GET /api/wallets/transactions
pub async fn get_transactions(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    Query(q): Query<TransactionsQuery>,
) -> ApiResult<impl IntoResponse> {
    let kind = blank_to_none(q.kind);
    let limit = q.limit.unwrap_or(50);
    let skip = q.skip.unwrap_or(0);

    let rows = account_service::list_transactions(&state, u.id, kind.as_deref(), skip, limit)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "transactions": rows.iter().map(|t| t.to_json()).collect::<Vec<_>>(),
        "skip": skip,
        "limit": limit.clamp(1, 200),
    })))
}
