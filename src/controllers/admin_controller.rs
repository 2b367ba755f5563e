//! `/api/admin/*`. Role is enforced by `require_auth`; every write is audited.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Extension, Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use mongodb::bson::doc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{ApiError, ApiResult, FieldErrors},
    models::CurrentUser,
    services::{
        admin_service::{self, Adjustment, UserPatch},
        audit_service, notification_service, payment_service, withdrawal_service,
    },
    AppState,
};

use super::{blank_to_none, parse_id, request_ip};

#[derive(Debug, Deserialize)]
pub struct UsersQuery {
    pub search: Option<String>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub actor_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RejectInput {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastInput {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
}

// GET /api/admin/dashboard
pub async fn get_dashboard(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let d = admin_service::dashboard(&state).await.map_err(ApiError::internal)?;
    Ok(Json(d))
}

// GET /api/admin/users
pub async fn get_users(State(state): State<AppState>, Query(q): Query<UsersQuery>) -> ApiResult<impl IntoResponse> {
    let skip = q.skip.unwrap_or(0);
    let limit = q.limit.unwrap_or(50);
    let search = blank_to_none(q.search);

    let (users, total) = admin_service::list_users(&state, search.as_deref(), skip, limit)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "users": users.iter().map(|u| u.to_json()).collect::<Vec<_>>(),
        "total": total,
        "skip": skip,
        "limit": limit.clamp(1, 200),
    })))
}

// GET /api/admin/users/:id
pub async fn get_user(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let user_id = parse_id(&id, "User")?;
    let (user, wallets) = admin_service::get_user(&state, user_id).await?;

    Ok(Json(json!({
        "user": user.to_json(),
        "wallets": wallets.iter().map(|w| w.to_json()).collect::<Vec<_>>(),
    })))
}

// PATCH /api/admin/users/:id
pub async fn patch_user(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Path(id): Path<String>,
    Json(patch): Json<UserPatch>,
) -> ApiResult<impl IntoResponse> {
    let user_id = parse_id(&id, "User")?;
    let user = admin_service::patch_user(&state, admin.id, user_id, &patch).await?;

    audit_service::record(
        &state,
        Some(admin.id),
        "admin.user_updated",
        Some(user_id.to_hex()),
        doc! { "status": patch.status, "role": patch.role },
        request_ip(&headers, peer),
    )
    .await;

    Ok(Json(json!({ "user": user.to_json() })))
}

// POST /api/admin/users/:id/adjust
pub async fn post_adjust(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Path(id): Path<String>,
    Json(adj): Json<Adjustment>,
) -> ApiResult<impl IntoResponse> {
    let user_id = parse_id(&id, "User")?;
    let wallet = admin_service::adjust_balance(&state, user_id, &adj).await?;

    audit_service::record(
        &state,
        Some(admin.id),
        "admin.balance_adjusted",
        Some(user_id.to_hex()),
        doc! { "currency": &wallet.currency, "amount": adj.amount, "reason": adj.reason.trim() },
        request_ip(&headers, peer),
    )
    .await;
    tracing::info!("admin {} adjusted {} {} for {}", admin.username, adj.amount, wallet.currency, user_id);

    Ok(Json(json!({ "wallet": wallet.to_json() })))
}

// GET /api/admin/withdrawals?status=pending
pub async fn get_withdrawals(State(state): State<AppState>, Query(q): Query<StatusQuery>) -> ApiResult<impl IntoResponse> {
    let status = blank_to_none(q.status);
    let items = withdrawal_service::list(&state, None, status.as_deref(), q.limit.unwrap_or(100))
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "withdrawals": items.iter().map(|w| w.to_json()).collect::<Vec<_>>(),
    })))
}

// POST /api/admin/withdrawals/:id/approve
pub async fn post_approve_withdrawal(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "Withdrawal")?;
    let w = withdrawal_service::approve(&state, admin.id, id).await?;

    audit_service::record(
        &state,
        Some(admin.id),
        "admin.withdrawal_approved",
        Some(w.id.to_hex()),
        doc! { "user_id": w.user_id, "currency": &w.currency, "amount": w.amount },
        request_ip(&headers, peer),
    )
    .await;

    Ok(Json(json!({ "withdrawal": w.to_json() })))
}

// POST /api/admin/withdrawals/:id/reject
pub async fn post_reject_withdrawal(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Path(id): Path<String>,
    Json(input): Json<RejectInput>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "Withdrawal")?;
    let w = withdrawal_service::reject(&state, admin.id, id, input.note).await?;

    audit_service::record(
        &state,
        Some(admin.id),
        "admin.withdrawal_rejected",
        Some(w.id.to_hex()),
        doc! { "user_id": w.user_id, "note": w.admin_note.clone() },
        request_ip(&headers, peer),
    )
    .await;

    Ok(Json(json!({ "withdrawal": w.to_json() })))
}

// GET /api/admin/deposits?status=finished
pub async fn get_deposits(State(state): State<AppState>, Query(q): Query<StatusQuery>) -> ApiResult<impl IntoResponse> {
    let status = blank_to_none(q.status);
    let items = payment_service::list_deposits(&state, None, status.as_deref(), q.limit.unwrap_or(100))
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "deposits": items.iter().map(|d| d.to_json()).collect::<Vec<_>>(),
    })))
}

// GET /api/admin/orders?status=open&limit=100
pub async fn get_orders(State(state): State<AppState>, Query(q): Query<StatusQuery>) -> ApiResult<impl IntoResponse> {
    let status = blank_to_none(q.status);
    let items = admin_service::list_orders(&state, status.as_deref(), q.limit.unwrap_or(100))
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "orders": items.iter().map(|o| o.to_json()).collect::<Vec<_>>(),
    })))
}

// GET /api/admin/audit-logs?action=auth.login&limit=100
pub async fn get_audit_logs(State(state): State<AppState>, Query(q): Query<AuditQuery>) -> ApiResult<impl IntoResponse> {
    let action = blank_to_none(q.action);
    let actor_id = match blank_to_none(q.actor_id) {
        Some(raw) => Some(parse_id(&raw, "User")?),
        None => None,
    };

    let rows = audit_service::list(&state, action.as_deref(), actor_id, q.limit.unwrap_or(100))
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "logs": rows.iter().map(|r| r.to_json()).collect::<Vec<_>>(),
    })))
}

// POST /api/admin/broadcast
pub async fn post_broadcast(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(input): Json<BroadcastInput>,
) -> ApiResult<impl IntoResponse> {
    let title = input.title.trim();
    let body = input.body.trim();

    let mut errs = FieldErrors::new();
    if title.is_empty() || title.len() > 120 {
        errs.insert("title".into(), "Title is required (max 120 chars).".into());
    }
    if body.is_empty() || body.len() > 2000 {
        errs.insert("body".into(), "Body is required (max 2000 chars).".into());
    }
    if !errs.is_empty() {
        return Err(ApiError::validation(errs));
    }

    let sent = notification_service::broadcast(&state, title, body)
        .await
        .map_err(ApiError::internal)?;

    audit_service::record(
        &state,
        Some(admin.id),
        "admin.broadcast",
        None,
        doc! { "title": title, "recipients": sent as i64 },
        request_ip(&headers, peer),
    )
    .await;

    Ok(Json(json!({ "ok": true, "sent": sent })))
}

// GET /api/admin/ws/stats
pub async fn get_ws_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "connections": state.connections.stats(),
        "price_stream": state.prices.status(),
        "rate_limited_clients": state.limiter.tracked(),
    }))
}
