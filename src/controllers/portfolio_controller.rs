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
    services::portfolio_service,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub days: Option<i64>,
}

// GET /api/portfolio
pub async fn get_portfolio(State(state): State<AppState>, Extension(u): Extension<CurrentUser>) -> ApiResult<impl IntoResponse> {
    let view = portfolio_service::get_portfolio(&state, u.id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(view))
}

// GET /api/portfolio/history?days=30
pub async fn get_history(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    let days = q.days.unwrap_or(30).clamp(1, 365);
    let history = portfolio_service::get_history(&state, u.id, days)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({ "days": days, "history": history })))
}
