use axum::{Router, routing::get};
use crate::{AppState, controllers::wallet_controller};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/api/wallets", get(wallet_controller::get_wallets))
        .route("/api/wallets/transactions", get(wallet_controller::get_transactions))
}
