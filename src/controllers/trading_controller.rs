use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{ApiError, ApiResult},
    models::{order, CurrentUser},
    services::trading_service::{self, OrderInput},
    AppState,
};

use super::{blank_to_none, parse_id};

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

fn check_status(status: Option<String>) -> ApiResult<Option<String>> {
    match blank_to_none(status) {
        None => Ok(None),
        Some(s) => {
            let s = s.to_lowercase();
            if [order::STATUS_OPEN, order::STATUS_FILLED, order::STATUS_CANCELLED].contains(&s.as_str()) {
                Ok(Some(s))
            } else {
                Err(ApiError::field("status", "Unknown order status."))
            }
        }
    }
}

// POST /api/orders
pub async fn post_order(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    Json(input): Json<OrderInput>,
) -> ApiResult<impl IntoResponse> {
    let order = trading_service::place_order(&state, u.id, &input).await?;
    tracing::info!(
        "order {} {} {} {} x{} -> {}",
        order.id,
        u.username,
        order.side,
        order.symbol,
        order.qty,
        order.status
    );

    Ok((StatusCode::CREATED, Json(json!({ "order": order.to_json() }))))
}

// GET /api/orders
pub async fn get_orders(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    Query(q): Query<OrdersQuery>,
) -> ApiResult<impl IntoResponse> {
    let status = check_status(q.status)?;
    let orders = trading_service::list_orders(&state, u.id, status.as_deref(), q.limit.unwrap_or(50))
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "orders": orders.iter().map(|o| o.to_json()).collect::<Vec<_>>(),
    })))
}

// GET /api/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let order_id = parse_id(&id, "Order")?;
    let order = trading_service::get_order(&state, u.id, order_id).await?;
    Ok(Json(json!({ "order": order.to_json() })))
}

// DELETE /api/orders/:id
pub async fn delete_order(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let order_id = parse_id(&id, "Order")?;
    let order = trading_service::cancel_order(&state, u.id, order_id).await?;
    Ok(Json(json!({ "order": order.to_json() })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_filter_accepts_known_values_only() {
        assert_eq!(check_status(None).unwrap(), None);
        assert_eq!(check_status(Some("  ".into())).unwrap(), None);
        assert_eq!(check_status(Some("Open".into())).unwrap().as_deref(), Some("open"));
        assert!(check_status(Some("pending".into())).is_err());
    }
}
