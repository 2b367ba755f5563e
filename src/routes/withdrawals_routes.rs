use axum::{Router, routing::{delete, get}};
use crate::{AppState, controllers::withdrawals_controller};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route(
            "/api/withdrawals",
            get(withdrawals_controller::get_withdrawals).post(withdrawals_controller::post_withdrawal),
        )
        .route("/api/withdrawals/:id", delete(withdrawals_controller::delete_withdrawal))
}
