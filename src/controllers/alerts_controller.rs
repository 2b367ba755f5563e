use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::{
    error::{ApiError, ApiResult},
    models::CurrentUser,
    services::alerts_service::{self, AlertInput},
    AppState,
};

use super::parse_id;

// GET /api/alerts
pub async fn get_alerts(State(state): State<AppState>, Extension(u): Extension<CurrentUser>) -> ApiResult<impl IntoResponse> {
    let alerts = alerts_service::list_user_alerts(&state, u.id)
        .await
        .map_err(ApiError::internal)?;

    let active = alerts.iter().filter(|a| !a.triggered).count();
    Ok(Json(json!({
        "alerts": alerts.iter().map(|a| a.to_json()).collect::<Vec<_>>(),
        "active": active,
        "max_active": alerts_service::MAX_ACTIVE_ALERTS,
    })))
}

// POST /api/alerts
pub async fn post_alert(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    Json(input): Json<AlertInput>,
) -> ApiResult<impl IntoResponse> {
    let alert = alerts_service::create_alert(&state, u.id, &input).await?;
    Ok((StatusCode::CREATED, Json(json!({ "alert": alert.to_json() }))))
}

// DELETE /api/alerts/:id
pub async fn delete_alert(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let alert_id = parse_id(&id, "Alert")?;

    let deleted = alerts_service::delete_alert(&state, u.id, alert_id)
        .await
        .map_err(ApiError::internal)?;
    if !deleted {
        return Err(ApiError::not_found("Alert not found"));
    }

    Ok(Json(json!({ "ok": true })))
}
