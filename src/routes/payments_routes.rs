use axum::{Router, routing::{get, post}};
use crate::{AppState, controllers::payments_controller};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/api/payments/currencies", get(payments_controller::get_currencies))
        .route("/api/payments/deposit", post(payments_controller::post_deposit))
        .route("/api/payments/deposits", get(payments_controller::get_deposits))
        .route("/api/payments/status/:payment_id", get(payments_controller::get_status))
        .route("/api/payments/ipn", post(payments_controller::post_ipn))
}
