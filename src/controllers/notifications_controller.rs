use axum::{
    extract::{Extension, Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{ApiError, ApiResult},
    models::CurrentUser,
    services::notification_service,
    AppState,
};

use super::parse_id;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceInput {
    #[serde(default)]
    pub token: String,
}

fn device_token(input: &DeviceInput) -> ApiResult<&str> {
    let token = input.token.trim();
    if token.is_empty() || token.len() > 4096 {
        return Err(ApiError::field("token", "Device token is required."));
    }
    Ok(token)
}

// GET /api/notifications
pub async fn get_notifications(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    Query(q): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let items = notification_service::list(&state, u.id, q.unread_only, q.limit.unwrap_or(50))
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "notifications": items.iter().map(|n| n.to_json()).collect::<Vec<_>>(),
    })))
}

// GET /api/notifications/unread-count
pub async fn get_unread_count(State(state): State<AppState>, Extension(u): Extension<CurrentUser>) -> ApiResult<impl IntoResponse> {
    let count = notification_service::unread_count(&state, u.id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "count": count })))
}

// POST /api/notifications/:id/read
pub async fn post_read(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "Notification")?;
    let found = notification_service::mark_read(&state, u.id, id)
        .await
        .map_err(ApiError::internal)?;
    if !found {
        return Err(ApiError::not_found("Notification not found"));
    }
    Ok(Json(json!({ "ok": true })))
}

// POST /api/notifications/read-all
pub async fn post_read_all(State(state): State<AppState>, Extension(u): Extension<CurrentUser>) -> ApiResult<impl IntoResponse> {
    let updated = notification_service::mark_all_read(&state, u.id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "ok": true, "updated": updated })))
}

// POST /api/notifications/devices
pub async fn post_device(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    Json(input): Json<DeviceInput>,
) -> ApiResult<impl IntoResponse> {
    let token = device_token(&input)?;
    notification_service::add_device(&state, u.id, token)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "ok": true })))
}

// DELETE /api/notifications/devices
pub async fn delete_device(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    Json(input): Json<DeviceInput>,
) -> ApiResult<impl IntoResponse> {
    let token = device_token(&input)?;
    notification_service::remove_device(&state, u.id, token)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "ok": true })))
}
