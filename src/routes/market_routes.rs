use axum::{Router, routing::get};
use crate::{AppState, controllers::market_controller};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/api/market/prices", get(market_controller::get_prices))
        .route("/api/market/overview", get(market_controller::get_overview))
        .route("/api/market/history/:symbol", get(market_controller::get_history))
        .route("/api/market/assets", get(market_controller::get_assets))
        .route("/api/market/stream", get(market_controller::get_stream_status))
}
