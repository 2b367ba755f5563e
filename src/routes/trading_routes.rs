use axum::{Router, routing::get};

use crate::{AppState, controllers::trading_controller};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/api/orders", get(trading_controller::get_orders).post(trading_controller::post_order))
        .route("/api/orders/:id", get(trading_controller::get_order).delete(trading_controller::delete_order))
}
