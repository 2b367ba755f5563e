use axum::{Router, routing::{get, post}};
use crate::{AppState, controllers::notifications_controller};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/api/notifications", get(notifications_controller::get_notifications))
        .route("/api/notifications/unread-count", get(notifications_controller::get_unread_count))
        .route("/api/notifications/read-all", post(notifications_controller::post_read_all))
        .route("/api/notifications/:id/read", post(notifications_controller::post_read))
        .route(
            "/api/notifications/devices",
            post(notifications_controller::post_device).delete(notifications_controller::delete_device),
        )
}
