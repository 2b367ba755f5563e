use axum::{Router, routing::get};
use crate::{AppState, controllers::referrals_controller};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router.route("/api/referrals", get(referrals_controller::get_referrals))
}
