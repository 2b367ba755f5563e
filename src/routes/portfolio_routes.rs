use axum::{Router, routing::get};
use crate::{AppState, controllers::portfolio_controller};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/api/portfolio", get(portfolio_controller::get_portfolio))
        .route("/api/portfolio/history", get(portfolio_controller::get_history))
}
